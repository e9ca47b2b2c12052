use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use super::Name;

/// Meta-information about a mailbox, as returned by
/// [`SELECT`](https://tools.ietf.org/html/rfc3501#section-6.3.1).
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxStatus {
    /// The mailbox that was selected.
    pub path: String,

    /// Defined flags in the mailbox.
    pub flags: Vec<String>,

    /// The number of messages in the mailbox.
    pub exists: u32,

    /// The number of messages with the \Recent flag set.
    pub recent: u32,

    /// The message sequence number of the first unseen message in the mailbox.
    pub unseen: Option<u32>,

    /// A list of message flags that the client can change permanently.
    pub permanent_flags: Vec<String>,

    /// The next unique identifier value.
    pub uid_next: Option<u32>,

    /// The unique identifier validity value.
    pub uid_validity: Option<u32>,
}

impl fmt::Display for MailboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "path: {}, flags: {:?}, exists: {}, recent: {}, unseen: {:?}, permanent_flags: {:?}, \
             uid_next: {:?}, uid_validity: {:?}",
            self.path,
            self.flags,
            self.exists,
            self.recent,
            self.unseen,
            self.permanent_flags,
            self.uid_next,
            self.uid_validity
        )
    }
}

/// The role a server advertises for a mailbox ([RFC 6154](https://tools.ietf.org/html/rfc6154)).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecialUse {
    /// A virtual mailbox holding every message.
    All,
    /// Archived messages.
    Archive,
    /// Unsent drafts.
    Drafts,
    /// A virtual mailbox of flagged messages.
    Flagged,
    /// Spam.
    Junk,
    /// Sent messages.
    Sent,
    /// Deleted messages awaiting removal.
    Trash,
}

impl fmt::Display for SpecialUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SpecialUse::All => "\\All",
            SpecialUse::Archive => "\\Archive",
            SpecialUse::Drafts => "\\Drafts",
            SpecialUse::Flagged => "\\Flagged",
            SpecialUse::Junk => "\\Junk",
            SpecialUse::Sent => "\\Sent",
            SpecialUse::Trash => "\\Trash",
        };
        f.write_str(s)
    }
}

/// One node of the mailbox hierarchy. Parents own their children.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Mailbox {
    /// The last hierarchy segment of the path.
    pub name: String,
    /// The full path, usable with `select_mailbox`.
    pub path: String,
    /// The hierarchy delimiter, if the server has one.
    pub delimiter: Option<String>,
    /// Raw name attributes as the server sent them.
    pub attributes: Vec<String>,
    /// The advertised special-use role.
    pub special_use: Option<SpecialUse>,
    /// Whether the mailbox can be selected.
    pub selectable: bool,
    /// Child mailboxes.
    pub children: Vec<Mailbox>,
}

impl Mailbox {
    fn from_name(name: &Name) -> Self {
        let leaf = match name.delimiter() {
            Some(d) if !d.is_empty() => name.name().rsplit(d).next().unwrap_or(name.name()),
            _ => name.name(),
        };
        Mailbox {
            name: leaf.to_string(),
            path: name.name().to_string(),
            delimiter: name.delimiter().map(str::to_string),
            attributes: name.attributes().iter().map(|a| a.to_string()).collect(),
            special_use: name.special_use(),
            selectable: name.is_selectable(),
            children: Vec::new(),
        }
    }

    /// Visit this mailbox and all of its descendants, depth-first.
    pub fn walk(&self) -> Vec<&Mailbox> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }
}

// INBOX first, then by path
fn sort_key(path: &str) -> (bool, &str) {
    (!path.eq_ignore_ascii_case("INBOX"), path)
}

/// Assemble a flat `LIST` result into a tree.
///
/// Each mailbox hangs off its nearest listed ancestor; mailboxes with no listed ancestor are
/// roots. Siblings are ordered INBOX first, then by path.
pub fn build_tree(names: &[Name]) -> Vec<Mailbox> {
    let mut order: Vec<&Name> = names.iter().collect();
    order.sort_by(|a, b| sort_key(a.name()).cmp(&sort_key(b.name())));
    order.dedup_by(|a, b| a.name() == b.name());

    let index: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(i, n)| (n.name(), i))
        .collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); order.len()];
    let mut roots = Vec::new();
    for (i, name) in order.iter().enumerate() {
        match parent_of(name, &index) {
            Some(p) => children[p].push(i),
            None => roots.push(i),
        }
    }

    fn assemble(i: usize, order: &[&Name], children: &[Vec<usize>]) -> Mailbox {
        let mut node = Mailbox::from_name(order[i]);
        node.children = children[i]
            .iter()
            .map(|&c| assemble(c, order, children))
            .collect();
        node
    }

    roots
        .into_iter()
        .map(|r| assemble(r, &order, &children))
        .collect()
}

fn parent_of(name: &Name, index: &HashMap<&str, usize>) -> Option<usize> {
    let delimiter = name.delimiter().filter(|d| !d.is_empty())?;
    let mut path = name.name();
    while let Some(cut) = path.rfind(delimiter) {
        path = &path[..cut];
        if let Some(&i) = index.get(path) {
            return Some(i);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NameAttribute;

    fn name(path: &str) -> Name {
        Name::new(path, Some("/"), vec![])
    }

    #[test]
    fn inbox_first_then_by_path() {
        let tree = build_tree(&[name("Sent"), name("Archive"), name("INBOX")]);
        let paths: Vec<_> = tree.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(paths, vec!["INBOX", "Archive", "Sent"]);
    }

    #[test]
    fn children_attach_to_nearest_listed_ancestor() {
        let tree = build_tree(&[
            name("Work/2024/Q1"),
            name("Work"),
            name("INBOX"),
            name("INBOX/Receipts"),
        ]);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].path, "INBOX");
        assert_eq!(tree[0].children[0].name, "Receipts");

        // Work/2024 is not listed, so Q1 hangs directly off Work
        assert_eq!(tree[1].path, "Work");
        assert_eq!(tree[1].children.len(), 1);
        assert_eq!(tree[1].children[0].path, "Work/2024/Q1");
        assert_eq!(tree[1].children[0].name, "Q1");
    }

    #[test]
    fn orphan_becomes_root() {
        let tree = build_tree(&[name("Lists/rust")]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].name, "rust");
        assert!(tree[0].children.is_empty());
    }

    #[test]
    fn flat_names_without_delimiter() {
        let tree = build_tree(&[Name::new("a.b", None, vec![]), Name::new("a", None, vec![])]);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[1].name, "a.b");
    }

    #[test]
    fn carries_attributes() {
        let tree = build_tree(&[
            Name::new("[Gmail]", Some("/"), vec![NameAttribute::NoSelect]),
            Name::new(
                "[Gmail]/Sent Mail",
                Some("/"),
                vec![NameAttribute::Special(SpecialUse::Sent)],
            ),
        ]);
        assert!(!tree[0].selectable);
        assert_eq!(tree[0].attributes, vec!["\\Noselect".to_string()]);
        let sent = &tree[0].children[0];
        assert!(sent.selectable);
        assert_eq!(sent.special_use, Some(SpecialUse::Sent));
        assert_eq!(tree[0].walk().len(), 2);
    }
}
