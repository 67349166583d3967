//! End-to-end pipeline tests: project assets through the orchestrator,
//! archive and package, into a patched ROM.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use starforge_lib::archive::format::read_project_name;
use starforge_lib::archive::{ArchiveBuilder, PatchAction, apply_archive, parse_chain};
use starforge_lib::asset::AssetRegistry;
use starforge_lib::build::{BuildOptions, BuildState, Orchestrator};
use starforge_lib::config::BuildConfig;
use starforge_lib::package::{patch_rom_from_package, read_package};
use starforge_lib::project::Project;
use tempfile::TempDir;

const ROM_START: usize = 0x200;

fn project(temp: &TempDir, name: &str) -> Arc<Project> {
  fs::write(
    temp.path().join("project.toml"),
    format!("id = \"{}\"\nname = \"{name}\"\n\n[engine]\nsha = \"e1\"\n", name.to_lowercase()),
  )
  .unwrap();
  let assets = temp.path().join("assets/area/kmr");
  fs::create_dir_all(&assets).unwrap();
  fs::write(assets.join("kmr_00.shape"), vec![3u8; 512]).unwrap();
  fs::write(assets.join("kmr_00_hit.collision"), vec![4u8; 128]).unwrap();
  fs::write(temp.path().join("assets/readme.txt"), "not an asset kind").unwrap();
  Arc::new(Project::load(temp.path()).unwrap())
}

fn orchestrator(project: &Arc<Project>) -> Orchestrator {
  let config = BuildConfig {
    parallelism: 2,
    ..BuildConfig::default()
  };
  Orchestrator::new(project.clone(), Arc::new(AssetRegistry::with_builtins()), config)
}

fn base_rom(path: &Path) {
  let mut image = vec![0u8; ROM_START];
  let mut builder = ArchiveBuilder::new("engine");
  builder.add_entry("title_bg", vec![9u8; 300], true).unwrap();
  image.extend(builder.build().unwrap());
  fs::write(path, image).unwrap();
}

#[tokio::test]
async fn build_package_and_patch() {
  let temp = TempDir::new().unwrap();
  let project = project(&temp, "Village");
  let orchestrator = orchestrator(&project);

  let report = orchestrator
    .execute(BuildOptions {
      force: false,
      archive: true,
      package: true,
    })
    .await
    .unwrap();

  assert!(report.summary.success());
  assert_eq!(report.summary.discovered, 3);
  assert_eq!(report.summary.built_count, 2);
  assert_eq!(report.summary.engine_sha, "e1");

  let state = BuildState::load(&project.state_file(), "e1").unwrap();
  assert_eq!(state.asset_timestamps.len(), 3);

  let package = report.package.unwrap();
  let contents = read_package(&package).unwrap();
  assert_eq!(contents.target.engine.sha, "e1");
  assert_eq!(contents.target.rom_start(), 0x1E4_0000);

  let archive = fs::read(report.archive.unwrap()).unwrap();
  assert_eq!(contents.archive, archive);
  let node = &parse_chain(&archive, 0).unwrap()[0];
  let names: Vec<&str> = node.files().map(|f| f.name.as_str()).collect();
  assert_eq!(names, vec!["kmr_00.shape", "kmr_00_hit.collision"]);

  let rom = temp.path().join("base.z64");
  base_rom(&rom);
  let first = apply_archive(&fs::read(&rom).unwrap(), &archive, ROM_START).unwrap();
  assert_eq!(first.action, PatchAction::Appended);
  fs::write(&rom, &first.image).unwrap();

  // A second application replaces the project's own node.
  let second = apply_archive(&first.image, &archive, ROM_START).unwrap();
  assert_eq!(second.action, PatchAction::Replaced);
  assert_eq!(second.address, first.address);

  let nodes = parse_chain(&second.image, ROM_START).unwrap();
  assert_eq!(nodes.len(), 2);
  assert_eq!(read_project_name(&second.image, nodes[0].address).unwrap(), "engine");
  assert_eq!(read_project_name(&second.image, nodes[1].address).unwrap(), "Village");
}

#[tokio::test]
async fn package_patch_uses_descriptor_address() {
  let temp = TempDir::new().unwrap();
  let project = project(&temp, "Village");

  let report = orchestrator(&project)
    .execute(BuildOptions {
      package: true,
      ..BuildOptions::default()
    })
    .await
    .unwrap();
  let package = report.package.unwrap();

  // The default descriptor address lies past the end of this small ROM.
  let rom = temp.path().join("base.z64");
  base_rom(&rom);
  let before = fs::read(&rom).unwrap();

  assert!(patch_rom_from_package(&rom, &package).is_err());
  assert_eq!(fs::read(&rom).unwrap(), before);
}

#[tokio::test]
async fn edits_rebuild_only_the_changed_asset() {
  let temp = TempDir::new().unwrap();
  let project = project(&temp, "Village");
  let orchestrator = orchestrator(&project);
  orchestrator.run(false).await.unwrap();

  let edited = temp.path().join("assets/area/kmr/kmr_00.shape");
  fs::write(&edited, vec![5u8; 64]).unwrap();
  let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
  fs::File::options()
    .write(true)
    .open(&edited)
    .unwrap()
    .set_modified(later)
    .unwrap();

  let summary = orchestrator.run(false).await.unwrap();
  assert_eq!(summary.scheduled, 1);
  assert_eq!(summary.built_count, 1);
  assert_eq!(
    fs::read(project.build_dir().join("area/kmr/kmr_00.shape")).unwrap(),
    vec![5u8; 64]
  );
}
