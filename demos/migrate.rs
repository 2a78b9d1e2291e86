// Restore a source directory into a destination in one pass: open every
// file visible through the overlay and drain its holes, leaving the
// destination self-sufficient.

use std::path::Path;

use clap::Arg;
use clap::Command;
use clap::crate_version;
use liverestore::FileHandle;
use liverestore::FileSystem;
use liverestore::FileType;
use liverestore::LiveRestoreFs;
use liverestore::OpenFlags;
use liverestore::Options;

fn main() {
    env_logger::init();
    let matches = Command::new("migrate")
        .version(crate_version!())
        .author("liverestore contributors")
        .arg(
            Arg::new("source")
                .required(true)
                .index(1)
                .help("Read-only directory to restore from"),
        )
        .arg(
            Arg::new("destination")
                .required(true)
                .index(2)
                .help("Writable directory to restore into"),
        )
        .get_matches();

    let source = matches.get_one::<String>("source").unwrap();
    let destination = matches.get_one::<String>("destination").unwrap();

    let fs = LiveRestoreFs::create(destination, Options::new(source)).unwrap();
    let root = Path::new(destination);

    for name in fs.directory_list(root, "").unwrap() {
        let logical = root.join(&name);
        let file = fs
            .open_file(&logical, FileType::Data, OpenFlags::empty())
            .unwrap();
        let pending = file.unrestored_bytes();
        file.fill_holes().unwrap();
        file.close().unwrap();
        println!("{name}: restored {pending} bytes");
    }

    fs.terminate().unwrap();
}
