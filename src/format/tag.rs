//! Three byte frame tags

use std::fmt;

/// Raw tag bytes as they appear on the wire.
pub type TagBytes = [u8; 3];

/// Frame kinds identified by their 3-byte ASCII tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// `LIN`: stream header JSON
    Header,
    /// `PAN`: first three bytes of the stream magic
    Magic,
    /// `SYN`: resynchronisation beacon
    Sync,
    /// `STA`: statistics and packet index JSON
    Stats,
    /// `FTR`: footer pointing at the `STA` frame
    Footer,
    /// `SRC`: source registration JSON
    AddSource,
    /// `JSN`: per-packet metadata JSON
    SourceJson,
    /// `PKT`: data packet
    SourcePacket,
    /// `END`: explicit terminator
    End,
}

impl Tag {
    pub const ALL: [Tag; 9] = [
        Tag::Header,
        Tag::Magic,
        Tag::Sync,
        Tag::Stats,
        Tag::Footer,
        Tag::AddSource,
        Tag::SourceJson,
        Tag::SourcePacket,
        Tag::End,
    ];

    /// Wire representation of this tag.
    pub const fn as_bytes(self) -> &'static TagBytes {
        match self {
            Tag::Header => b"LIN",
            Tag::Magic => b"PAN",
            Tag::Sync => b"SYN",
            Tag::Stats => b"STA",
            Tag::Footer => b"FTR",
            Tag::AddSource => b"SRC",
            Tag::SourceJson => b"JSN",
            Tag::SourcePacket => b"PKT",
            Tag::End => b"END",
        }
    }

    /// Decode a tag, returning `None` for byte triples that are not tags.
    pub fn from_bytes(bytes: TagBytes) -> Option<Tag> {
        Tag::ALL.into_iter().find(|tag| *tag.as_bytes() == bytes)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&tag_name(self.as_bytes()))
    }
}

/// Printable form of raw tag bytes, escaping anything that is not ASCII text.
pub fn tag_name(bytes: &TagBytes) -> String {
    bytes.iter().flat_map(|b| std::ascii::escape_default(*b)).map(char::from).collect()
}
