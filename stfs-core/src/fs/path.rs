//! Path resolution
//!
//! Paths are absolute and `/`-separated; the empty path names the root.
//! Every component is looked up among the inodes whose parent is the
//! previous component.

use rand_core::RngCore;
use stfs_hal::FlashMedium;

use super::Stfs;
use crate::chunk::{Chunk, Inode};
use crate::config::{NAME_MAX, ROOT_OID};
use crate::error::{Error, Result};
use crate::store::{Cursor, Filter, Location};

/// A resolved path
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
    /// The virtual root directory, which has no inode
    Root,
    /// A stored object and where its inode lives
    Entry(Location, Inode),
}

impl Node {
    pub(crate) fn oid(&self) -> u32 {
        match self {
            Node::Root => ROOT_OID,
            Node::Entry(_, inode) => inode.oid,
        }
    }

    pub(crate) fn is_dir(&self) -> bool {
        match self {
            Node::Root => true,
            Node::Entry(_, inode) => inode.is_dir(),
        }
    }
}

/// Split an absolute path into its parent path and final component
pub(crate) fn split_parent(path: &str) -> Result<(&str, &str)> {
    if !path.starts_with('/') {
        return Err(Error::RelativePath);
    }
    match path.rfind('/') {
        Some(index) => Ok((&path[..index], &path[index + 1..])),
        None => Err(Error::RelativePath),
    }
}

/// Check a name for a new object
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(Error::InvalidName);
    }
    if name.len() > NAME_MAX {
        return Err(Error::NameSize);
    }
    Ok(())
}

impl<M: FlashMedium, R: RngCore, const FILES: usize> Stfs<M, R, FILES> {
    /// Find the child of `parent` called `name`
    pub(crate) fn lookup(&mut self, parent: u32, name: &[u8]) -> Result<Option<(Location, Inode)>> {
        let geometry = self.store.geometry();
        let mut cursor = Cursor::START;
        while let Some((location, chunk)) = self.store.find(Filter::InodeByParent(parent), cursor)? {
            if let Chunk::Inode(inode) = chunk {
                if inode.name() == name {
                    return Ok(Some((location, inode)));
                }
            }
            cursor = Cursor::after(location, geometry);
        }
        Ok(None)
    }

    /// Resolve an absolute path
    pub(crate) fn resolve(&mut self, path: &str) -> Result<Node> {
        if path.is_empty() {
            return Ok(Node::Root);
        }
        let rest = path.strip_prefix('/').ok_or(Error::RelativePath)?;

        let mut node = Node::Root;
        for name in rest.split('/') {
            if name.is_empty() || name.len() > NAME_MAX {
                return Err(Error::NameSize);
            }
            node = match self.lookup(node.oid(), name.as_bytes())? {
                Some((location, inode)) => Node::Entry(location, inode),
                None => {
                    trace!("no component '{}'", name);
                    return Err(Error::NotFound);
                }
            };
        }
        Ok(node)
    }

    /// Validate the path of an object about to be created
    ///
    /// Returns the parent OID and the new name.
    pub(crate) fn check_new_entry<'p>(&mut self, path: &'p str) -> Result<(u32, &'p str)> {
        let (parent_path, name) = split_parent(path)?;
        validate_name(name)?;
        let parent = self.resolve(parent_path)?;
        if !parent.is_dir() {
            return Err(Error::WrongObject);
        }
        if self.lookup(parent.oid(), name.as_bytes())?.is_some() {
            return Err(Error::Exists);
        }
        Ok((parent.oid(), name))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::formatted;
    use super::*;
    use crate::fs::OpenMode;

    #[test]
    fn test_split_parent() {
        assert_eq!(split_parent("/a"), Ok(("", "a")));
        assert_eq!(split_parent("/a/b/c"), Ok(("/a/b", "c")));
        assert_eq!(split_parent("/a/"), Ok(("/a", "")));
        assert_eq!(split_parent("a/b"), Err(Error::RelativePath));
    }

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name(""), Err(Error::InvalidName));
        assert_eq!(validate_name("."), Err(Error::InvalidName));
        assert_eq!(validate_name(".."), Err(Error::InvalidName));
        assert_eq!(validate_name("..."), Ok(()));
        assert_eq!(validate_name(&"x".repeat(NAME_MAX)), Ok(()));
        assert_eq!(validate_name(&"x".repeat(NAME_MAX + 1)), Err(Error::NameSize));
    }

    #[test]
    fn test_resolve_root() {
        let mut fs = formatted();
        assert_eq!(fs.resolve(""), Ok(Node::Root));
        assert_eq!(fs.resolve("/"), Err(Error::NameSize));
    }

    #[test]
    fn test_resolve_nested() {
        let mut fs = formatted();
        fs.mkdir("/a").unwrap();
        fs.mkdir("/a/b").unwrap();
        let fd = fs.open("/a/b/c", OpenMode::Create).unwrap();
        fs.close(fd).unwrap();

        let a = fs.resolve("/a").unwrap();
        let b = fs.resolve("/a/b").unwrap();
        let c = fs.resolve("/a/b/c").unwrap();
        assert!(a.is_dir() && b.is_dir() && !c.is_dir());
        match (&b, &c) {
            (Node::Entry(_, b), Node::Entry(_, c)) => {
                assert_eq!(c.parent, b.oid);
                assert_eq!(c.name(), b"c");
            }
            _ => panic!("expected entries"),
        }
    }

    #[test]
    fn test_resolve_errors() {
        let mut fs = formatted();
        fs.mkdir("/a").unwrap();
        assert_eq!(fs.resolve("a"), Err(Error::RelativePath));
        assert_eq!(fs.resolve("/missing"), Err(Error::NotFound));
        assert_eq!(fs.resolve("/a/missing"), Err(Error::NotFound));
        assert_eq!(fs.resolve("/a//b"), Err(Error::NameSize));
        assert_eq!(fs.resolve("/a/"), Err(Error::NameSize));
        let long = std::format!("/{}", "x".repeat(NAME_MAX + 1));
        assert_eq!(fs.resolve(&long), Err(Error::NameSize));
    }

    #[test]
    fn test_same_name_in_different_directories() {
        let mut fs = formatted();
        fs.mkdir("/a").unwrap();
        fs.mkdir("/b").unwrap();
        fs.mkdir("/a/x").unwrap();
        fs.mkdir("/b/x").unwrap();
        assert_ne!(fs.resolve("/a/x").unwrap().oid(), fs.resolve("/b/x").unwrap().oid());
    }
}
