//! Resource paths.
//!
//! A [`ResourcePath`] identifies one trackable unit of data: either the
//! global metadata record or a single week×class timetable. Paths are stored
//! as their segments joined with `:`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Delimiter between path segments in storage keys.
pub const DELIMITER: char = ':';

/// A path contained an empty segment or no segments at all.
#[derive(Debug, Error)]
#[error("invalid resource path: {0}")]
pub struct InvalidPathError(pub String);

/// Ordered, non-empty sequence of non-empty segments identifying a resource.
///
/// Two paths are equal iff their segment sequences are equal. Ordering is
/// lexicographic over segments, which matches ordering of the joined form
/// as long as segments never contain the delimiter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourcePath(Vec<String>);

/// The components of a timetable path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimetablePath {
    pub semester: String,
    pub week: u32,
    pub class: String,
}

impl ResourcePath {
    /// Build a path from segments, rejecting empty input and segments that
    /// are empty or contain the delimiter.
    pub fn new<I, S>(segments: I) -> Result<Self, InvalidPathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(InvalidPathError("no segments".to_string()));
        }
        for segment in &segments {
            if segment.is_empty() || segment.contains(DELIMITER) {
                return Err(InvalidPathError(format!("bad segment {segment:?}")));
            }
        }
        Ok(Self(segments))
    }

    /// Parse a storage key back into a path.
    pub fn parse(joined: &str) -> Result<Self, InvalidPathError> {
        Self::new(joined.split(DELIMITER))
    }

    /// The path of the global metadata record.
    pub fn meta() -> Self {
        Self(vec!["meta".to_string()])
    }

    /// The path of one week×class timetable.
    pub fn timetable(semester: &str, week: u32, class: &str) -> Self {
        Self(vec![
            "semesters".to_string(),
            semester.to_string(),
            "weeks".to_string(),
            week.to_string(),
            "classes".to_string(),
            class.to_string(),
        ])
    }

    /// Path segments.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Storage key form: segments joined with `:`.
    pub fn joined(&self) -> String {
        self.0.join(&DELIMITER.to_string())
    }

    /// Whether this is the global metadata path.
    pub fn is_meta(&self) -> bool {
        self.0.len() == 1 && self.0[0] == "meta"
    }

    /// Decompose a `semesters:<s>:weeks:<w>:classes:<c>` path.
    ///
    /// Returns `None` for any other shape, including a non-numeric week.
    pub fn as_timetable(&self) -> Option<TimetablePath> {
        match self.0.as_slice() {
            [kind, semester, weeks, week, classes, class]
                if kind == "semesters" && weeks == "weeks" && classes == "classes" =>
            {
                Some(TimetablePath {
                    semester: semester.clone(),
                    week: week.parse().ok()?,
                    class: class.clone(),
                })
            }
            _ => None,
        }
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.joined())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joined_round_trips_through_parse() {
        let path = ResourcePath::timetable("12", 3, "7");
        assert_eq!(path.joined(), "semesters:12:weeks:3:classes:7");
        assert_eq!(ResourcePath::parse(&path.joined()).unwrap(), path);
    }

    #[test]
    fn rejects_empty_segments() {
        assert!(ResourcePath::new(Vec::<String>::new()).is_err());
        assert!(ResourcePath::new(["a", ""]).is_err());
        assert!(ResourcePath::new(["a:b"]).is_err());
        assert!(ResourcePath::parse("a::b").is_err());
    }

    #[test]
    fn recognizes_path_shapes() {
        assert!(ResourcePath::meta().is_meta());
        assert!(ResourcePath::timetable("s", 0, "c").as_timetable().is_some());

        let tt = ResourcePath::parse("semesters:hs24:weeks:5:classes:3a")
            .unwrap()
            .as_timetable()
            .unwrap();
        assert_eq!(tt.semester, "hs24");
        assert_eq!(tt.week, 5);
        assert_eq!(tt.class, "3a");

        // Non-numeric week is not a timetable path.
        let odd = ResourcePath::parse("semesters:hs24:weeks:x:classes:3a").unwrap();
        assert!(odd.as_timetable().is_none());
        assert!(ResourcePath::parse("meta:next_updates").unwrap().as_timetable().is_none());
    }
}
