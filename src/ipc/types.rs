use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde::Deserialize;

use crate::db;

/// One line of stdin. `params` defaults to `null` when omitted.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// An open grading workspace: a directory holding `gradebook.sqlite3`.
pub struct Workspace {
    pub root: PathBuf,
    pub conn: Connection,
}

/// Sidecar state across requests. At most one workspace is open at a time.
#[derive(Default)]
pub struct AppState {
    workspace: Option<Workspace>,
}

impl AppState {
    /// Opens (creating if needed) the workspace at `root` and makes it current.
    /// On failure the previously open workspace stays selected.
    pub fn open_workspace(&mut self, root: &Path) -> anyhow::Result<&Workspace> {
        let conn = db::open_db(root)?;
        Ok(self.workspace.insert(Workspace {
            root: root.to_path_buf(),
            conn,
        }))
    }

    pub fn conn(&self) -> Option<&Connection> {
        self.workspace.as_ref().map(|w| &w.conn)
    }

    pub fn workspace_path(&self) -> Option<&Path> {
        self.workspace.as_ref().map(|w| w.root.as_path())
    }
}
