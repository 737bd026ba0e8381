//! mount-bmpfs - mount a BMP image's pixel region as a flat-namespace filesystem
//!
//! Usage:
//!   mount-bmpfs -o image=photo.bmp /mnt/bmp
//!   mount-bmpfs -o image=photo.bmp,ro,allow_other /mnt/bmp
//!
//! The backing image path is carried as one of the `-o` options rather than its own flag so that
//! every other `-o` value can be forwarded verbatim to `fuser::MountOption`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use fuser::MountOption;

#[derive(Parser)]
#[command(name = "mount-bmpfs")]
#[command(about = "Mount a BMP image's pixel region as a flat-namespace filesystem")]
struct Args {
    /// Mount point
    mountpoint: PathBuf,

    /// Comma-separated mount options; one entry must be `image=<path-to-bmp>`
    #[arg(short = 'o', value_delimiter = ',')]
    options: Vec<String>,
}

/// Translate one comma-separated `-o` token into a `fuser::MountOption`. `fuser` does not
/// implement `FromStr` for this type, so the common names are spelled out by hand; anything else
/// is forwarded as a `CUSTOM` option the way a raw `mount(8)` would pass it through.
fn parse_mount_option(opt: &str) -> Option<MountOption> {
    Some(match opt {
        "auto_unmount" => MountOption::AutoUnmount,
        "allow_other" => MountOption::AllowOther,
        "allow_root" => MountOption::AllowRoot,
        "default_permissions" => MountOption::DefaultPermissions,
        "dev" => MountOption::Dev,
        "nodev" => MountOption::NoDev,
        "suid" => MountOption::Suid,
        "nosuid" => MountOption::NoSuid,
        "ro" => MountOption::RO,
        "rw" => MountOption::RW,
        "exec" => MountOption::Exec,
        "noexec" => MountOption::NoExec,
        "atime" => MountOption::Atime,
        "noatime" => MountOption::NoAtime,
        "dirsync" => MountOption::DirSync,
        "sync" => MountOption::Sync,
        "async" => MountOption::Async,
        other if other.is_empty() => return None,
        other => MountOption::CUSTOM(other.to_string()),
    })
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let mut image: Option<PathBuf> = None;
    let mut mount_options = vec![MountOption::FSName("bmpfs".to_string())];

    for opt in &args.options {
        if let Some(path) = opt.strip_prefix("image=") {
            image = Some(PathBuf::from(path));
            continue;
        }
        match parse_mount_option(opt) {
            Some(mount_opt) => mount_options.push(mount_opt),
            None => {
                log::error!("unrecognized mount option: {opt}");
                return ExitCode::FAILURE;
            }
        }
    }

    let Some(image) = image else {
        log::error!("missing required -o image=<path-to-bmp>");
        return ExitCode::FAILURE;
    };

    let fs = match bmpfs::BmpFilesystem::open(image.clone()) {
        Ok(fs) => fs,
        Err(err) => {
            log::error!("cannot mount {}: {err}", image.display());
            return ExitCode::FAILURE;
        }
    };

    match fuser::mount2(fs, &args.mountpoint, &mount_options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("mount failed: {err}");
            ExitCode::FAILURE
        }
    }
}
