//! The mapping layer between abstract metadata field names and format-specific record keys.
//!
//! Every supported format stores the same logical fields under different keys: the title lives
//! in the `TITLE` Vorbis comment, the `TIT2` (or `TT2`) ID3 frame and the `Title` APE item.
//! The static [`FORMAT_TABLE`] holds one row per abstract field; the containers consult it in
//! their `get_field`/`set_field` implementations instead of dispatching dynamically.

/// An abstract metadata field, independent of the container format it is stored in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldId {
    /// The track title.
    Title,
    /// The track artist.
    Artist,
    /// The album name.
    Album,
    /// The album artist.
    AlbumArtist,
    /// The composer.
    Composer,
    /// The genre.
    Genre,
    /// The comment.
    Comment,
    /// The release year.
    Year,
    /// The track number and total number of tracks.
    TrackNumber,
    /// The disc number and total number of discs.
    DiscNumber,
}

/// The value encoding of an abstract field.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldKind {
    /// A plain text value.
    Text,
    /// A numeric pair rendered as `"current"` or `"current/total"`.
    NumericPair,
}

/// One row of the format table: the concrete keys an abstract field maps to.
#[derive(Clone, Copy, Debug)]
pub struct FieldMapping {
    /// The abstract field.
    pub id: FieldId,
    /// The value encoding of the field.
    pub kind: FieldKind,
    /// The FLAC VORBIS_COMMENT key.
    pub vorbis: &'static str,
    /// The ID3v2.2 frame identifier (3 bytes).
    pub id3v22: &'static str,
    /// The ID3v2.3 frame identifier (4 bytes).
    pub id3v23: &'static str,
    /// The ID3v2.4 frame identifier (4 bytes).
    pub id3v24: &'static str,
    /// The APEv2 item key.
    pub ape: &'static str,
}

/// The static map from abstract field names to concrete record keys.
#[rustfmt::skip]
pub const FORMAT_TABLE: [FieldMapping; 10] = [
    FieldMapping { id: FieldId::Title,       kind: FieldKind::Text,        vorbis: "TITLE",       id3v22: "TT2", id3v23: "TIT2", id3v24: "TIT2", ape: "Title" },
    FieldMapping { id: FieldId::Artist,      kind: FieldKind::Text,        vorbis: "ARTIST",      id3v22: "TP1", id3v23: "TPE1", id3v24: "TPE1", ape: "Artist" },
    FieldMapping { id: FieldId::Album,       kind: FieldKind::Text,        vorbis: "ALBUM",       id3v22: "TAL", id3v23: "TALB", id3v24: "TALB", ape: "Album" },
    FieldMapping { id: FieldId::AlbumArtist, kind: FieldKind::Text,        vorbis: "ALBUMARTIST", id3v22: "TP2", id3v23: "TPE2", id3v24: "TPE2", ape: "Album Artist" },
    FieldMapping { id: FieldId::Composer,    kind: FieldKind::Text,        vorbis: "COMPOSER",    id3v22: "TCM", id3v23: "TCOM", id3v24: "TCOM", ape: "Composer" },
    FieldMapping { id: FieldId::Genre,       kind: FieldKind::Text,        vorbis: "GENRE",       id3v22: "TCO", id3v23: "TCON", id3v24: "TCON", ape: "Genre" },
    FieldMapping { id: FieldId::Comment,     kind: FieldKind::Text,        vorbis: "COMMENT",     id3v22: "COM", id3v23: "COMM", id3v24: "COMM", ape: "Comment" },
    FieldMapping { id: FieldId::Year,        kind: FieldKind::Text,        vorbis: "DATE",        id3v22: "TYE", id3v23: "TYER", id3v24: "TDRC", ape: "Year" },
    FieldMapping { id: FieldId::TrackNumber, kind: FieldKind::NumericPair, vorbis: "TRACKNUMBER", id3v22: "TRK", id3v23: "TRCK", id3v24: "TRCK", ape: "Track" },
    FieldMapping { id: FieldId::DiscNumber,  kind: FieldKind::NumericPair, vorbis: "DISCNUMBER",  id3v22: "TPA", id3v23: "TPOS", id3v24: "TPOS", ape: "Disc" },
];

/// Returns the format table row of the abstract field.
pub fn mapping(id: FieldId) -> &'static FieldMapping {
    FORMAT_TABLE.iter().find(|m| m.id == id).unwrap_or(&FORMAT_TABLE[0])
}

/// Options controlling how numeric pair values are rendered.
///
/// Passed explicitly into the rendering functions; there is no process-wide formatting state.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FormattingOptions {
    /// Zero-pads the current number to this width, e.g. `Some(2)` renders track 4 as `"04"`.
    pub zero_pad: Option<usize>,
}

/// Renders a numeric pair as `"current"` when the total is zero and `"current/total"`
/// otherwise.
pub fn render_pair(current: u32, total: u32, opts: &FormattingOptions) -> String {
    let current = match opts.zero_pad {
        Some(width) => format!("{:0width$}", current, width = width),
        None => current.to_string(),
    };

    match total {
        0 => current,
        _ => format!("{}/{}", current, total),
    }
}

/// Parses a numeric pair back out of its textual form.
///
/// The current number is the first integer in the string, the total is the first integer after
/// a `'/'`; a missing part defaults to 0.
pub fn parse_pair(s: &str) -> (u32, u32) {
    let (current, rest) = first_int(s);
    let total = match rest.find('/') {
        Some(idx) => first_int(&rest[idx + 1..]).0,
        None => 0,
    };
    (current, total)
}

/// Extracts the first integer of the string, returning it and the remainder after it.
fn first_int(s: &str) -> (u32, &str) {
    let start = match s.find(|c: char| c.is_ascii_digit()) {
        Some(i) => i,
        None => return (0, s),
    };
    let end = s[start..]
        .find(|c: char| !c.is_ascii_digit())
        .map(|i| start + i)
        .unwrap_or_else(|| s.len());

    (s[start..end].parse().unwrap_or(0), &s[end..])
}

/// Returns the trimmed text if it carried leading or trailing whitespace.
pub fn clean_text(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed == s {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

/// Returns the canonical rendering of a numeric pair value if the stored form deviates from
/// it, e.g. by carrying leading zeroes.
pub fn clean_pair(s: &str) -> Option<String> {
    let (current, total) = parse_pair(s);
    let canonical = render_pair(current, total, &FormattingOptions::default());
    if canonical == s {
        None
    } else {
        Some(canonical)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn render() {
        let opts = FormattingOptions::default();
        assert_eq!(render_pair(2, 3, &opts), "2/3");
        assert_eq!(render_pair(4, 0, &opts), "4");
    }

    #[test]
    fn render_zero_padded() {
        let opts = FormattingOptions { zero_pad: Some(2) };
        assert_eq!(render_pair(4, 0, &opts), "04");
        assert_eq!(render_pair(4, 12, &opts), "04/12");
    }

    #[test]
    fn parse() {
        assert_eq!(parse_pair("4"), (4, 0));
        assert_eq!(parse_pair("2/3"), (2, 3));
        assert_eq!(parse_pair("02/3"), (2, 3));
        assert_eq!(parse_pair("track 7 of 13"), (7, 0));
        assert_eq!(parse_pair("7/"), (7, 0));
        assert_eq!(parse_pair(""), (0, 0));
    }

    #[test]
    fn clean() {
        assert_eq!(clean_text(" a "), Some("a".to_owned()));
        assert_eq!(clean_text("a"), None);
        assert_eq!(clean_pair("02/03"), Some("2/3".to_owned()));
        assert_eq!(clean_pair("2/3"), None);
    }
}
