//! Path canonicalization: `.` / `..` factoring and tilde expansion

use crate::{FsError, Result};

/// Canonize a raw path using the given separator
///
/// - `.` and empty segments are dropped (a leading separator is kept as the root marker)
/// - `..` removes the previously retained segment; climbing above the root is an error
/// - `~` as a whole segment is replaced by `tilde` when one is given
///
/// Every retained segment keeps the separator that followed it in the input,
/// so a trailing separator on a directory path survives canonization.
pub fn canonize(path: &str, separator: &str, tilde: Option<&str>) -> Result<String> {
    if path.is_empty() || separator.is_empty() {
        return Ok(path.to_string());
    }

    let mut rooted = path.starts_with(separator);
    let mut rest = if rooted { &path[separator.len()..] } else { path };

    // (segment, followed by a separator)
    let mut kept: Vec<(String, bool)> = Vec::new();

    while !rest.is_empty() {
        let (segment, trailing, next) = match rest.find(separator) {
            Some(pos) => (&rest[..pos], true, &rest[pos + separator.len()..]),
            None => (rest, false, ""),
        };
        rest = next;

        match (segment, tilde) {
            ("" | ".", _) => {}
            ("..", _) => {
                if kept.pop().is_none() {
                    return Err(FsError::MalformedLocation(format!(
                        "Path climbs above its root: {}",
                        path
                    )));
                }
            }
            ("~", Some(expansion)) => {
                if kept.is_empty() && expansion.starts_with(separator) {
                    rooted = true;
                }
                kept.extend(
                    expansion
                        .split(separator)
                        .filter(|s| !s.is_empty())
                        .map(|s| (s.to_string(), true)),
                );
                if let Some(last) = kept.last_mut() {
                    last.1 = trailing;
                }
            }
            _ => kept.push((segment.to_string(), trailing)),
        }
    }

    let mut out = String::with_capacity(path.len());
    if rooted {
        out.push_str(separator);
    }
    for (segment, trailing) in &kept {
        out.push_str(segment);
        if *trailing {
            out.push_str(separator);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_segments() {
        assert_eq!(canonize("/a/./b/../c", "/", None).unwrap(), "/a/c");
        assert_eq!(canonize("/a/b/..", "/", None).unwrap(), "/a/");
        assert_eq!(canonize("/a//b/", "/", None).unwrap(), "/a/b/");
        assert_eq!(canonize("/a/..", "/", None).unwrap(), "/");
        assert_eq!(canonize("/", "/", None).unwrap(), "/");
    }

    #[test]
    fn test_climbing_above_root_is_an_error() {
        assert!(matches!(
            canonize("/a/../..", "/", None),
            Err(FsError::MalformedLocation(_))
        ));
        assert!(canonize("..", "/", None).is_err());
    }

    #[test]
    fn test_tilde_expansion() {
        assert_eq!(
            canonize("/~/docs", "/", Some("/home/user")).unwrap(),
            "/home/user/docs"
        );
        assert_eq!(canonize("~", "/", Some("/home/user")).unwrap(), "/home/user");
        assert_eq!(
            canonize("/~/../x", "/", Some("/home/user")).unwrap(),
            "/home/x"
        );
        // Without an expansion the segment is kept literally
        assert_eq!(canonize("/~/docs", "/", None).unwrap(), "/~/docs");
    }

    #[test]
    fn test_other_separator() {
        assert_eq!(
            canonize("\\share\\.\\dir\\..\\file", "\\", None).unwrap(),
            "\\share\\file"
        );
    }

    #[test]
    fn test_idempotence() {
        let inputs = [
            "/a/./b/../c/",
            "/x//y/./z",
            "relative/./path/../here",
            "/~/docs/../pics/",
            "/",
            "/a/b/c/../../d/",
        ];
        for input in inputs {
            let once = canonize(input, "/", Some("/home/u")).unwrap();
            let twice = canonize(&once, "/", Some("/home/u")).unwrap();
            assert_eq!(once, twice, "not idempotent for {}", input);
        }
    }
}
