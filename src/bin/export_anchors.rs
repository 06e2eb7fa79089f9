//! Computes the detector's anchor table and writes it to disk, for
//! inspection or for consumers that load anchors instead of generating them.

use std::{fs::File, io::BufWriter, path::PathBuf};

use clap::Parser;
use log::info;

use posecrop::anchors::{AnchorConfig, Anchors};

#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Where to write the binary anchor table.
    #[arg(long, default_value = "anchors.npy")]
    npy: PathBuf,

    /// Where to write the plain-text anchor table.
    #[arg(long, default_value = "anchors.txt")]
    text: PathBuf,
}

fn main() -> anyhow::Result<()> {
    posecrop::init_logger!();
    let args = Args::parse();

    let anchors = Anchors::generate(&AnchorConfig::pose_detection_224())?;
    anchors.write_npy(BufWriter::new(File::create(&args.npy)?))?;
    anchors.write_text(BufWriter::new(File::create(&args.text)?))?;
    info!(
        "wrote {} anchors to `{}` and `{}`",
        anchors.count(),
        args.npy.display(),
        args.text.display(),
    );
    Ok(())
}
