use super::SpecialUse;

/// A name that matches a `LIST` command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Name {
    pub(crate) attributes: Vec<NameAttribute>,
    pub(crate) delimiter: Option<String>,
    pub(crate) name: String,
}

/// An attribute set for an IMAP name.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum NameAttribute {
    /// It is not possible for any child levels of hierarchy to exist
    /// under this name; no child levels exist now and none can be
    /// created in the future.
    NoInferiors,

    /// It is not possible to use this name as a selectable mailbox.
    NoSelect,

    /// The mailbox has been marked "interesting" by the server; the
    /// mailbox probably contains messages that have been added since
    /// the last time the mailbox was selected.
    Marked,

    /// The mailbox does not contain any additional messages since the
    /// last time the mailbox was selected.
    Unmarked,

    /// A [special-use](https://tools.ietf.org/html/rfc6154) attribute.
    Special(SpecialUse),

    /// A non-standard user- or server-defined name attribute.
    Custom(String),
}

impl NameAttribute {
    fn system(s: &str) -> Option<Self> {
        let attr = match s.to_ascii_lowercase().as_str() {
            "\\noinferiors" => NameAttribute::NoInferiors,
            "\\noselect" | "\\nonexistent" => NameAttribute::NoSelect,
            "\\marked" => NameAttribute::Marked,
            "\\unmarked" => NameAttribute::Unmarked,
            "\\all" => NameAttribute::Special(SpecialUse::All),
            "\\archive" => NameAttribute::Special(SpecialUse::Archive),
            "\\drafts" => NameAttribute::Special(SpecialUse::Drafts),
            "\\flagged" => NameAttribute::Special(SpecialUse::Flagged),
            "\\junk" => NameAttribute::Special(SpecialUse::Junk),
            "\\sent" => NameAttribute::Special(SpecialUse::Sent),
            "\\trash" => NameAttribute::Special(SpecialUse::Trash),
            _ => return None,
        };
        Some(attr)
    }
}

impl From<&str> for NameAttribute {
    fn from(s: &str) -> Self {
        NameAttribute::system(s).unwrap_or_else(|| NameAttribute::Custom(s.to_string()))
    }
}

impl<'a> From<&imap_proto::NameAttribute<'a>> for NameAttribute {
    fn from(attr: &imap_proto::NameAttribute<'a>) -> Self {
        use imap_proto::NameAttribute as Wire;
        #[allow(unreachable_patterns)]
        match attr {
            Wire::NoInferiors => NameAttribute::NoInferiors,
            Wire::NoSelect => NameAttribute::NoSelect,
            Wire::Marked => NameAttribute::Marked,
            Wire::Unmarked => NameAttribute::Unmarked,
            Wire::All => NameAttribute::Special(SpecialUse::All),
            Wire::Archive => NameAttribute::Special(SpecialUse::Archive),
            Wire::Drafts => NameAttribute::Special(SpecialUse::Drafts),
            Wire::Flagged => NameAttribute::Special(SpecialUse::Flagged),
            Wire::Junk => NameAttribute::Special(SpecialUse::Junk),
            Wire::Sent => NameAttribute::Special(SpecialUse::Sent),
            Wire::Trash => NameAttribute::Special(SpecialUse::Trash),
            Wire::Extension(s) => NameAttribute::from(&**s),
            other => NameAttribute::Custom(format!("{:?}", other)),
        }
    }
}

impl std::fmt::Display for NameAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NameAttribute::NoInferiors => f.write_str("\\Noinferiors"),
            NameAttribute::NoSelect => f.write_str("\\Noselect"),
            NameAttribute::Marked => f.write_str("\\Marked"),
            NameAttribute::Unmarked => f.write_str("\\Unmarked"),
            NameAttribute::Special(use_) => write!(f, "{}", use_),
            NameAttribute::Custom(s) => f.write_str(s),
        }
    }
}

impl Name {
    /// Build a name from its parts.
    pub fn new(
        name: impl Into<String>,
        delimiter: Option<&str>,
        attributes: impl IntoIterator<Item = NameAttribute>,
    ) -> Self {
        Name {
            attributes: attributes.into_iter().collect(),
            delimiter: delimiter.map(str::to_string),
            name: name.into(),
        }
    }

    /// Attributes of this name.
    pub fn attributes(&self) -> &[NameAttribute] {
        &self.attributes[..]
    }

    /// The hierarchy delimiter is a character used to delimit levels of hierarchy in a mailbox
    /// name. `None` means that no hierarchy exists; the name is a "flat" name.
    pub fn delimiter(&self) -> Option<&str> {
        self.delimiter.as_deref()
    }

    /// The full path of the mailbox, valid as an argument to `SELECT` unless
    /// [`NameAttribute::NoSelect`] is set.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the mailbox can be selected.
    pub fn is_selectable(&self) -> bool {
        !self.attributes.contains(&NameAttribute::NoSelect)
    }

    /// The special-use role advertised for this mailbox, if any.
    pub fn special_use(&self) -> Option<SpecialUse> {
        self.attributes.iter().find_map(|a| match a {
            NameAttribute::Special(s) => Some(*s),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_attributes_are_case_insensitive() {
        assert_eq!(NameAttribute::from("\\NoSelect"), NameAttribute::NoSelect);
        assert_eq!(
            NameAttribute::from("\\Sent"),
            NameAttribute::Special(SpecialUse::Sent)
        );
        assert_eq!(
            NameAttribute::from("\\HasChildren"),
            NameAttribute::Custom("\\HasChildren".to_string())
        );
    }

    #[test]
    fn selectable_and_special_use() {
        let name = Name::new(
            "Trash",
            Some("/"),
            vec![NameAttribute::Special(SpecialUse::Trash)],
        );
        assert!(name.is_selectable());
        assert_eq!(name.special_use(), Some(SpecialUse::Trash));

        let name = Name::new("[Gmail]", Some("/"), vec![NameAttribute::NoSelect]);
        assert!(!name.is_selectable());
        assert_eq!(name.special_use(), None);
    }
}
