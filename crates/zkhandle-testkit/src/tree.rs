//! The mock server's in-memory namespace.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use zkhandle_protocol::{CreateMode, ErrorCode, Stat};

#[derive(Debug, Clone)]
struct Node {
    data: Vec<u8>,
    /// Child names in creation order.
    children: Vec<String>,
    stat: Stat,
}

/// A namespace tree with the same result codes a real server gives.
///
/// Children are listed in creation order, which keeps test assertions
/// deterministic.
#[derive(Debug)]
pub(crate) struct Tree {
    nodes: HashMap<String, Node>,
    zxid: i64,
}

impl Default for Tree {
    fn default() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            "/".to_string(),
            Node {
                data: Vec::new(),
                children: Vec::new(),
                stat: Stat::default(),
            },
        );
        Self { nodes, zxid: 0 }
    }
}

impl Tree {
    /// The id of the most recent change.
    pub(crate) fn zxid(&self) -> i64 {
        self.zxid
    }

    pub(crate) fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    pub(crate) fn children(&self, path: &str) -> Result<Vec<String>, ErrorCode> {
        let node = self.nodes.get(path).ok_or(ErrorCode::NoNode)?;
        Ok(node.children.clone())
    }

    pub(crate) fn get(&self, path: &str) -> Result<(Vec<u8>, Stat), ErrorCode> {
        let node = self.nodes.get(path).ok_or(ErrorCode::NoNode)?;
        Ok((node.data.clone(), node.stat))
    }

    /// Creates a node and returns its actual path.
    pub(crate) fn create(
        &mut self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
        owner: i64,
    ) -> Result<String, ErrorCode> {
        validate_path(path)?;
        let (parent_path, _) = split_parent(path).ok_or(ErrorCode::NodeExists)?;

        let parent = self.nodes.get(parent_path).ok_or(ErrorCode::NoNode)?;
        if parent.stat.ephemeral_owner != 0 {
            return Err(ErrorCode::NoChildrenForEphemerals);
        }

        let path = match mode {
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential => {
                format!("{path}{:010}", parent.stat.cversion)
            }
            CreateMode::Persistent | CreateMode::Ephemeral => path.to_string(),
        };
        if self.nodes.contains_key(&path) {
            return Err(ErrorCode::NodeExists);
        }

        self.zxid += 1;
        let now = now_millis();
        let ephemeral =
            matches!(mode, CreateMode::Ephemeral | CreateMode::EphemeralSequential);
        let stat = Stat {
            czxid: self.zxid,
            mzxid: self.zxid,
            ctime: now,
            mtime: now,
            ephemeral_owner: if ephemeral { owner } else { 0 },
            data_length: data.len() as i32,
            pzxid: self.zxid,
            ..Stat::default()
        };
        self.nodes.insert(
            path.clone(),
            Node {
                data: data.to_vec(),
                children: Vec::new(),
                stat,
            },
        );

        let zxid = self.zxid;
        if let Some((_, name)) = split_parent(&path) {
            if let Some(parent) = self.nodes.get_mut(parent_path) {
                parent.children.push(name.to_string());
                parent.stat.cversion += 1;
                parent.stat.num_children += 1;
                parent.stat.pzxid = zxid;
            }
        }
        Ok(path)
    }

    /// Creates `path` and any missing ancestors as persistent nodes,
    /// replacing the data of `path` if it already exists.
    pub(crate) fn seed(&mut self, path: &str, data: &[u8]) {
        let mut prefix = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            prefix.push('/');
            prefix.push_str(segment);
            if !self.nodes.contains_key(&prefix) {
                let _ = self.create(&prefix, &[], CreateMode::Persistent, 0);
            }
        }
        if let Some(node) = self.nodes.get_mut(path) {
            node.data = data.to_vec();
            node.stat.data_length = data.len() as i32;
        }
    }

    pub(crate) fn delete(&mut self, path: &str, version: i32) -> Result<(), ErrorCode> {
        validate_path(path)?;
        let (parent_path, name) = split_parent(path).ok_or(ErrorCode::BadArguments)?;

        let node = self.nodes.get(path).ok_or(ErrorCode::NoNode)?;
        if version != -1 && version != node.stat.version {
            return Err(ErrorCode::BadVersion);
        }
        if !node.children.is_empty() {
            return Err(ErrorCode::NotEmpty);
        }

        self.nodes.remove(path);
        self.zxid += 1;
        let zxid = self.zxid;
        if let Some(parent) = self.nodes.get_mut(parent_path) {
            parent.children.retain(|c| c != name);
            parent.stat.num_children -= 1;
            parent.stat.cversion += 1;
            parent.stat.pzxid = zxid;
        }
        Ok(())
    }

    /// Removes every ephemeral node owned by `owner`.
    pub(crate) fn remove_ephemerals(&mut self, owner: i64) {
        if owner == 0 {
            return;
        }
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.stat.ephemeral_owner == owner)
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            let _ = self.delete(&path, -1);
        }
    }
}

/// Rejects paths a real server would refuse with `BadArguments`.
fn validate_path(path: &str) -> Result<(), ErrorCode> {
    let valid = path.starts_with('/')
        && (path == "/" || !path.ends_with('/'))
        && !path.contains("//")
        && !path.contains('\0');
    if valid { Ok(()) } else { Err(ErrorCode::BadArguments) }
}

/// Splits `/a/b` into (`/a`, `b`). Returns `None` for the root.
fn split_parent(path: &str) -> Option<(&str, &str)> {
    let (parent, name) = path.rsplit_once('/')?;
    if name.is_empty() {
        return None;
    }
    Some((if parent.is_empty() { "/" } else { parent }, name))
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_list_in_creation_order() {
        let mut tree = Tree::default();
        tree.create("/b", b"", CreateMode::Persistent, 0).unwrap();
        tree.create("/a", b"", CreateMode::Persistent, 0).unwrap();

        assert_eq!(tree.children("/").unwrap(), ["b", "a"]);
    }

    #[test]
    fn test_create_result_codes() {
        let mut tree = Tree::default();
        tree.create("/a", b"x", CreateMode::Persistent, 0).unwrap();

        assert_eq!(
            tree.create("/a", b"", CreateMode::Persistent, 0),
            Err(ErrorCode::NodeExists)
        );
        assert_eq!(
            tree.create("/missing/child", b"", CreateMode::Persistent, 0),
            Err(ErrorCode::NoNode)
        );
        assert_eq!(
            tree.create("no-slash", b"", CreateMode::Persistent, 0),
            Err(ErrorCode::BadArguments)
        );
        assert_eq!(
            tree.create("/a/", b"", CreateMode::Persistent, 0),
            Err(ErrorCode::BadArguments)
        );
    }

    #[test]
    fn test_sequential_names_use_parent_cversion() {
        let mut tree = Tree::default();
        tree.create("/q", b"", CreateMode::Persistent, 0).unwrap();

        let first = tree
            .create("/q/item-", b"", CreateMode::PersistentSequential, 0)
            .unwrap();
        let second = tree
            .create("/q/item-", b"", CreateMode::PersistentSequential, 0)
            .unwrap();

        assert_eq!(first, "/q/item-0000000000");
        assert_eq!(second, "/q/item-0000000001");
    }

    #[test]
    fn test_delete_result_codes() {
        let mut tree = Tree::default();
        tree.seed("/a/b", b"");

        assert_eq!(tree.delete("/a", -1), Err(ErrorCode::NotEmpty));
        assert_eq!(tree.delete("/nope", -1), Err(ErrorCode::NoNode));
        assert_eq!(tree.delete("/a/b", 5), Err(ErrorCode::BadVersion));
        assert_eq!(tree.delete("/", -1), Err(ErrorCode::BadArguments));

        tree.delete("/a/b", 0).unwrap();
        tree.delete("/a", -1).unwrap();
        assert!(tree.children("/").unwrap().is_empty());
    }

    #[test]
    fn test_seed_creates_ancestors_and_sets_data() {
        let mut tree = Tree::default();
        tree.seed("/x/y/z", b"payload");

        assert!(tree.contains("/x"));
        assert!(tree.contains("/x/y"));
        let (data, stat) = tree.get("/x/y/z").unwrap();
        assert_eq!(data, b"payload");
        assert_eq!(stat.data_length, 7);
    }

    #[test]
    fn test_remove_ephemerals_only_for_owner() {
        let mut tree = Tree::default();
        tree.create("/mine", b"", CreateMode::Ephemeral, 7).unwrap();
        tree.create("/theirs", b"", CreateMode::Ephemeral, 8).unwrap();
        tree.create("/kept", b"", CreateMode::Persistent, 7).unwrap();

        tree.remove_ephemerals(7);

        assert_eq!(tree.children("/").unwrap(), ["theirs", "kept"]);
    }

    #[test]
    fn test_ephemeral_cannot_have_children() {
        let mut tree = Tree::default();
        tree.create("/e", b"", CreateMode::Ephemeral, 1).unwrap();

        assert_eq!(
            tree.create("/e/child", b"", CreateMode::Persistent, 1),
            Err(ErrorCode::NoChildrenForEphemerals)
        );
    }
}
