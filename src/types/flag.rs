use std::fmt;

/// A message flag. Everything but [`Flag::Keyword`] is a system flag from
/// [RFC 3501 section 2.3.2](https://tools.ietf.org/html/rfc3501#section-2.3.2) and is written with
/// a leading `\` on the wire.
///
/// `\Recent` is maintained by the server and cannot be stored by a client.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
#[non_exhaustive]
pub enum Flag {
    Seen,
    Answered,
    /// Marked for urgent or special attention.
    Flagged,
    /// Marked for removal by the next `EXPUNGE`.
    Deleted,
    Draft,
    Recent,
    /// `\*` in a mailbox's permanent flags: new keywords may be created by storing them.
    MayCreate,
    /// A user or server defined keyword, such as `$Forwarded`.
    Keyword(String),
}

impl Flag {
    /// Interpret a flag exactly as the server sent it.
    pub fn from_wire(s: &str) -> Flag {
        match s {
            "\\Seen" => Flag::Seen,
            "\\Answered" => Flag::Answered,
            "\\Flagged" => Flag::Flagged,
            "\\Deleted" => Flag::Deleted,
            "\\Draft" => Flag::Draft,
            "\\Recent" => Flag::Recent,
            "\\*" => Flag::MayCreate,
            other => Flag::Keyword(other.to_string()),
        }
    }

    /// Resolve a caller-supplied flag name.
    ///
    /// System flags match case-insensitively with or without the leading backslash, and `read`
    /// is accepted for `\Seen`. Anything else that is a valid IMAP atom becomes a keyword.
    /// Returns `None` for names that cannot be sent in a `STORE`.
    pub fn from_name(name: &str) -> Option<Flag> {
        let name = name.trim();
        let bare = name.strip_prefix('\\').unwrap_or(name);
        let flag = match bare.to_ascii_lowercase().as_str() {
            "seen" | "read" => Flag::Seen,
            "answered" => Flag::Answered,
            "flagged" => Flag::Flagged,
            "deleted" => Flag::Deleted,
            "draft" => Flag::Draft,
            "recent" => Flag::Recent,
            "*" => Flag::MayCreate,
            "" => return None,
            _ if name.starts_with('\\') => return None,
            _ if bare.chars().any(is_atom_special) => return None,
            _ => Flag::Keyword(bare.to_string()),
        };
        Some(flag)
    }

    /// Whether a client may add or remove this flag with `STORE`.
    pub fn is_storable(&self) -> bool {
        !matches!(self, Flag::Recent | Flag::MayCreate)
    }
}

// atom-specials from RFC 3501 section 9, plus the list wildcards
fn is_atom_special(c: char) -> bool {
    c.is_control() || c.is_whitespace() || "(){%*\"\\]".contains(c)
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let system = match self {
            Flag::Seen => "Seen",
            Flag::Answered => "Answered",
            Flag::Flagged => "Flagged",
            Flag::Deleted => "Deleted",
            Flag::Draft => "Draft",
            Flag::Recent => "Recent",
            Flag::MayCreate => "*",
            Flag::Keyword(k) => return f.write_str(k),
        };
        write!(f, "\\{}", system)
    }
}
