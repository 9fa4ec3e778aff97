//! Well-known places a game keeps its `SavedGames` folder.
//!
//! Order matters: the per-user LocalLow folder is where current builds write,
//! install-relative `SNAppData` folders only hold saves from older builds.

use crate::types::Game;
use std::path::{Path, PathBuf};

const SAVED_GAMES: &str = "SavedGames";
const APP_DATA: &str = "SNAppData";

pub fn candidate_paths(game: Game) -> Vec<PathBuf> {
  let mut out = Vec::new();

  if let Some(home) = user_home() {
    out.push(local_low_saves(&home, game));
  }

  if let Some(dir) = steam_app_dir(game) {
    out.push(install_saves(&dir));
  }

  for root in default_install_roots() {
    out.push(install_saves(&root.join(game.folder_name())));
  }

  out.dedup();
  out
}

fn local_low_saves(home: &Path, game: Game) -> PathBuf {
  home
    .join("AppData")
    .join("LocalLow")
    .join("Unknown Worlds")
    .join(game.folder_name())
    .join(game.folder_name())
    .join(SAVED_GAMES)
}

fn install_saves(game_dir: &Path) -> PathBuf {
  game_dir.join(APP_DATA).join(SAVED_GAMES)
}

fn user_home() -> Option<PathBuf> {
  std::env::var_os("USERPROFILE")
    .filter(|v| !v.is_empty())
    .map(PathBuf::from)
    .or_else(dirs::home_dir)
}

/// Looks the game up in every Steam library folder, wherever Steam is installed.
fn steam_app_dir(game: Game) -> Option<PathBuf> {
  let steam_dir = steamlocate::SteamDir::locate().ok()?;
  let (app, library) = steam_dir.find_app(game.steam_app_id()).ok().flatten()?;
  let path = library.resolve_app_dir(&app);
  path.exists().then_some(path)
}

fn default_install_roots() -> Vec<PathBuf> {
  let program_files =
    std::env::var("ProgramFiles").unwrap_or_else(|_| "C:\\Program Files".to_string());
  let program_files_x86 =
    std::env::var("ProgramFiles(x86)").unwrap_or_else(|_| "C:\\Program Files (x86)".to_string());

  vec![
    PathBuf::from(&program_files)
      .join("Steam")
      .join("steamapps")
      .join("common"),
    PathBuf::from(&program_files_x86)
      .join("Steam")
      .join("steamapps")
      .join("common"),
    PathBuf::from(&program_files).join("Epic Games"),
  ]
}
