#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use rofs::{
    BuiltinCodecConfigs, MappingKind, MountOptions, Nid, ObservableKind, RofsMount, StatFs,
};
use serde::Serialize;
use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
struct InspectOutput {
    volume_name: String,
    uuid: String,
    block_size: u32,
    blocks: u32,
    meta_blkaddr: u32,
    root_nid: u64,
    inos: u64,
    compat: Vec<&'static str>,
    incompat: Vec<&'static str>,
    codecs: BuiltinCodecConfigs,
    devices: Vec<DeviceOutput>,
    options: String,
    statfs: StatFs,
}

#[derive(Debug, Serialize)]
struct DeviceOutput {
    id: u16,
    path: PathBuf,
    tag: String,
    blocks: u32,
    mapped_blkaddr: u32,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum MapRow {
    Hole {
        logical_offset: u64,
        length: u64,
    },
    Inline {
        logical_offset: u64,
        length: u64,
        addr: u64,
    },
    Mapped {
        logical_offset: u64,
        length: u64,
        device_id: u16,
        physical: u64,
        /// Device and offset after mapped-window resolution.
        resolved_device: u16,
        resolved_offset: u64,
    },
}

/// Arguments shared by every command.
struct CommonArgs {
    image: PathBuf,
    options: MountOptions,
    json: bool,
    rest: Vec<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_usage();
        return Ok(());
    };
    let rest: Vec<String> = args.collect();

    match command.as_str() {
        "inspect" => {
            let common = parse_common(&command, rest)?;
            let fs = open(&common)?;
            let output = inspect(&fs);
            if common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&output).context("serialize output")?
                );
            } else {
                print_inspect(&output);
            }
            Ok(())
        }
        "map" => {
            let common = parse_common(&command, rest)?;
            let nid = parse_nid(&common.rest)?;
            let fs = open(&common)?;
            let rows = map_rows(&fs, nid)?;
            if common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&rows).context("serialize output")?
                );
            } else {
                for row in &rows {
                    println!("{}", format_row(row));
                }
            }
            Ok(())
        }
        "cat" => {
            let common = parse_common(&command, rest)?;
            let nid = parse_nid(&common.rest)?;
            let fs = open(&common)?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            cat(&fs, nid, &mut out)?;
            out.flush().context("flush stdout")?;
            Ok(())
        }
        "--help" | "-h" | "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            bail!("unknown command: {command}")
        }
    }
}

fn print_usage() {
    println!("rofs-cli\n");
    println!("USAGE:");
    println!("  rofs-cli inspect <image-path> [-o <options>] [--json]");
    println!("  rofs-cli map <image-path> <nid> [-o <options>] [--json]");
    println!("  rofs-cli cat <image-path> <nid> [-o <options>]");
    println!();
    println!("OPTIONS:");
    println!("  -o  comma-separated mount options, e.g. device=/dev/vdb,noacl");
    println!();
    println!("Set RUST_LOG=debug for resolution tracing on stderr.");
}

fn parse_common(command: &str, args: Vec<String>) -> Result<CommonArgs> {
    let mut image = None;
    let mut options = MountOptions::default();
    let mut json = false;
    let mut rest = Vec::new();

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--json" => json = true,
            "-o" | "--options" => {
                let Some(value) = iter.next() else {
                    bail!("{arg} requires a value");
                };
                options = MountOptions::parse(&value)
                    .with_context(|| format!("invalid mount options {value:?}"))?;
            }
            _ if image.is_none() => image = Some(PathBuf::from(arg)),
            _ => rest.push(arg),
        }
    }

    let Some(image) = image else {
        bail!("{command} requires an image path");
    };
    Ok(CommonArgs {
        image,
        options,
        json,
        rest,
    })
}

fn parse_nid(rest: &[String]) -> Result<Nid> {
    let Some(raw) = rest.first() else {
        bail!("missing nid argument");
    };
    let nid = raw
        .parse::<u64>()
        .with_context(|| format!("nid must be a decimal number, got {raw:?}"))?;
    Ok(Nid(nid))
}

fn open(common: &CommonArgs) -> Result<RofsMount> {
    open_image(&common.image, common.options.clone())
}

fn open_image(path: &Path, options: MountOptions) -> Result<RofsMount> {
    RofsMount::open(path, options)
        .with_context(|| format!("failed to mount image {}", path.display()))
}

// ── Commands ────────────────────────────────────────────────────────────────

fn inspect(fs: &RofsMount) -> InspectOutput {
    let sb = fs.superblock();
    InspectOutput {
        volume_name: sb.volume_name.clone(),
        uuid: sb.uuid_string(),
        block_size: sb.block_size(),
        blocks: sb.blocks,
        meta_blkaddr: sb.meta_blkaddr,
        root_nid: sb.root_nid.0,
        inos: sb.inos,
        compat: sb.feature_compat.describe(),
        incompat: sb.feature_incompat.describe(),
        codecs: *fs.codecs(),
        devices: fs
            .device_table()
            .devices()
            .iter()
            .map(|dev| DeviceOutput {
                id: dev.id.0,
                path: dev.path.clone(),
                tag: dev.tag.clone(),
                blocks: dev.blocks,
                mapped_blkaddr: dev.mapped_blkaddr,
            })
            .collect(),
        options: fs.options().to_string(),
        statfs: fs.statfs(),
    }
}

fn print_inspect(output: &InspectOutput) {
    println!("Read-only Image Inspector");
    println!("volume_name: {}", output.volume_name);
    println!("uuid: {}", output.uuid);
    println!("block_size: {}", output.block_size);
    println!("blocks: {}", output.blocks);
    println!("total_blocks: {}", output.statfs.total_blocks);
    println!("meta_blkaddr: {}", output.meta_blkaddr);
    println!("root_nid: {}", output.root_nid);
    println!("inos: {}", output.inos);
    println!("compat: {}", output.compat.join(","));
    println!("incompat: {}", output.incompat.join(","));
    if let Some(lz4) = output.codecs.lz4 {
        println!(
            "lz4: max_distance={} max_pclusterblks={} distance_pages={}",
            lz4.max_distance, lz4.max_pclusterblks, lz4.max_distance_pages
        );
    }
    if let Some(lzma) = output.codecs.lzma {
        println!("lzma: dict_size={}", lzma.dict_size);
    }
    for dev in &output.devices {
        println!(
            "device {}: {} tag={:?} blocks={} mapped_blkaddr={}",
            dev.id,
            dev.path.display(),
            dev.tag,
            dev.blocks,
            dev.mapped_blkaddr
        );
    }
    println!("options: {}", output.options);
}

fn map_rows(fs: &RofsMount, nid: Nid) -> Result<Vec<MapRow>> {
    let inode = fs
        .read_inode(nid)
        .with_context(|| format!("failed to read inode {}", nid.0))?;
    let extents = fs
        .extents(&inode)
        .with_context(|| format!("failed to walk extents of nid {}", nid.0))?;

    let mut meta = rofs::MetaBuf::new();
    let mut rows = Vec::with_capacity(extents.len());
    for mapping in &extents {
        let row = match mapping.kind {
            MappingKind::Hole => MapRow::Hole {
                logical_offset: mapping.logical_offset,
                length: mapping.logical_len,
            },
            MappingKind::Inline { addr } => MapRow::Inline {
                logical_offset: mapping.logical_offset,
                length: mapping.logical_len,
                addr,
            },
            MappingKind::Mapped {
                device_id,
                physical,
            } => {
                let seen = fs.map(mapping, &mut meta)?;
                let (resolved_device, resolved_offset) = match seen.kind {
                    ObservableKind::Mapped {
                        device_id, offset, ..
                    } => (device_id.0, offset),
                    ObservableKind::Hole | ObservableKind::Inline { .. } => {
                        bail!("mapped extent of nid {} lost its device", nid.0)
                    }
                };
                MapRow::Mapped {
                    logical_offset: mapping.logical_offset,
                    length: mapping.logical_len,
                    device_id: device_id.0,
                    physical,
                    resolved_device,
                    resolved_offset,
                }
            }
        };
        rows.push(row);
    }
    meta.release();
    Ok(rows)
}

fn format_row(row: &MapRow) -> String {
    match row {
        MapRow::Hole {
            logical_offset,
            length,
        } => format!("{logical_offset:>12} +{length:<10} hole"),
        MapRow::Inline {
            logical_offset,
            length,
            addr,
        } => format!("{logical_offset:>12} +{length:<10} inline @{addr}"),
        MapRow::Mapped {
            logical_offset,
            length,
            device_id,
            physical,
            resolved_device,
            resolved_offset,
        } => format!(
            "{logical_offset:>12} +{length:<10} dev {device_id} @{physical} -> dev {resolved_device} @{resolved_offset}"
        ),
    }
}

fn cat(fs: &RofsMount, nid: Nid, out: &mut dyn Write) -> Result<u64> {
    let inode = fs
        .read_inode(nid)
        .with_context(|| format!("failed to read inode {}", nid.0))?;
    let mut buf = vec![0_u8; 1 << 16];
    let mut offset = 0_u64;
    loop {
        let n = fs
            .read_at(&inode, offset, &mut buf)
            .with_context(|| format!("read of nid {} failed at offset {offset}", nid.0))?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n]).context("write output")?;
        offset += n as u64;
    }
    Ok(offset)
}
