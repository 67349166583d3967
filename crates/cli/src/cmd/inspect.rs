//! Implementation of the `starforge inspect` command.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use starforge_lib::archive::format::read_project_name;
use starforge_lib::archive::{ArchiveNode, parse_chain};

use super::patch::chain_start;
use crate::output::{OutputFormat, entry_row, format_address, print_info, print_json, print_node};

#[derive(Serialize)]
struct NodeOutput {
  address: usize,
  project: String,
  next: u32,
  files: Vec<FileOutput>,
}

#[derive(Serialize)]
struct FileOutput {
  name: String,
  offset: u32,
  compressed_size: u32,
  decompressed_size: u32,
}

/// List every archive node in the chain at the resolved start address.
pub fn cmd_inspect(rom: &Path, start: Option<u32>, syms: Option<&Path>, format: OutputFormat) -> Result<()> {
  let start = chain_start(start, syms)?;
  let image = std::fs::read(rom).with_context(|| format!("Failed to read {}", rom.display()))?;
  let nodes = parse_chain(&image, start as usize)
    .with_context(|| format!("No valid archive chain at {}", format_address(start as usize)))?;

  let nodes: Vec<NodeOutput> = nodes.iter().map(|node| describe(&image, node)).collect();

  if format.is_json() {
    return print_json(&nodes);
  }

  print_info(&format!("{} node(s) in {}", nodes.len(), rom.display()));
  for node in &nodes {
    println!();
    print_node(node.address, &node.project, node.next);
    for file in &node.files {
      println!(
        "{}",
        entry_row(&file.name, file.offset, file.compressed_size, file.decompressed_size)
      );
    }
  }
  Ok(())
}

fn describe(image: &[u8], node: &ArchiveNode) -> NodeOutput {
  NodeOutput {
    address: node.address,
    project: read_project_name(image, node.address).unwrap_or_default(),
    next: node.next,
    files: node
      .files()
      .map(|f| FileOutput {
        name: f.name.clone(),
        offset: f.offset,
        compressed_size: f.compressed_size,
        decompressed_size: f.decompressed_size,
      })
      .collect(),
  }
}
