//! Renders the `adeval(1)` manual page from the clap definitions.
//!
//! The page lands in `$OUT_DIR/man/man1/`, laid out like a `MANPATH`
//! entry, so packaging can copy the `man` directory as-is. The directory
//! is exported to the crate as `ADEVAL_MAN_DIR`.

use std::env;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

const MAN_SECTION: &str = "1";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    for watched in ["build.rs", "src/cli/mod.rs"] {
        writeln!(stdout, "cargo:rerun-if-changed={watched}")?;
    }

    let out_dir = env::var_os("OUT_DIR").map(PathBuf::from).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set")
    })?;
    let man_root = out_dir.join("man");
    let section_dir = man_root.join(format!("man{MAN_SECTION}"));
    fs::create_dir_all(&section_dir)?;

    let man = Man::new(cli::Cli::command()).section(MAN_SECTION);
    let mut page = Vec::new();
    man.render(&mut page)?;
    fs::write(section_dir.join(format!("adeval.{MAN_SECTION}")), page)?;

    writeln!(stdout, "cargo:rustc-env=ADEVAL_MAN_DIR={}", man_root.display())?;
    Ok(())
}
