//! Print the atom (box) hierarchy of an MP4-family file
//!
//! Run with: cargo run --example dump_atoms -- FILE.mp4
//!
//! ```text
//! ftyp
//! moov
//!     mvhd
//!     trak
//!         tkhd
//! ```

use std::fs::File;
use std::io::BufReader;

use rtmp_relay::atom::{render_hierarchy, AtomReader};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("Usage: dump_atoms FILE");
        std::process::exit(1);
    };

    let mut reader = AtomReader::from_reader(BufReader::new(File::open(&path)?))?;
    let (atoms, errors) = reader.read_all_lenient();

    println!("{}", render_hierarchy(&atoms));
    for e in &errors {
        eprintln!("error: {}", e);
    }
    if !errors.is_empty() {
        std::process::exit(2);
    }
    Ok(())
}
