#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use rofs_harness::{extract_superblock_fixture, sample_image, validate_superblock_fixture};
use std::env;
use std::fs;
use std::path::Path;

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let cmd = args.first().map(String::as_str);

    match cmd {
        Some("check-fixtures") => {
            let path = Path::new("conformance/fixtures/rofs_superblock_sparse.json");
            let sb = validate_superblock_fixture(path)?;
            println!(
                "rofs: block_size={} volume={} root_nid={}",
                sb.block_size(),
                sb.volume_name,
                sb.root_nid
            );
            Ok(())
        }
        Some("generate-fixture") => {
            let image_path = Path::new(
                args.get(1)
                    .context("usage: rofs-harness generate-fixture <image>")?,
            );
            let image = fs::read(image_path)
                .with_context(|| format!("failed to read {}", image_path.display()))?;
            let fixture = extract_superblock_fixture(&image)?;
            println!("{}", serde_json::to_string_pretty(&fixture)?);
            Ok(())
        }
        Some("sample-image") => {
            let out = Path::new(args.get(1).context("usage: rofs-harness sample-image <out>")?);
            let image = sample_image()?;
            fs::write(out, &image).with_context(|| format!("failed to write {}", out.display()))?;
            println!("wrote {} bytes to {}", image.len(), out.display());
            Ok(())
        }
        Some("--help" | "-h" | "help") | None => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            print_usage();
            bail!("unknown command: {other}")
        }
    }
}

fn print_usage() {
    println!("rofs-harness <command>");
    println!();
    println!("commands:");
    println!("  check-fixtures             parse conformance/fixtures/*.json");
    println!("  generate-fixture <image>   dump block 0 as a sparse JSON fixture");
    println!("  sample-image <out>         write the built-in sample image");
}
