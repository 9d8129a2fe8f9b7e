//! Character-level text deltas.
//!
//! A delta is a tab-separated list of operations: `=n` keeps n chars, `-n` drops n chars,
//! `+text` inserts text. Inserted text escapes `%` and tab as `%25` and `%09`.

use similar::{Algorithm, DiffTag};

use super::DiffError;

pub fn diff_text(old: &str, new: &str) -> String {
    let old_chars: Vec<char> = old.chars().collect();
    let new_chars: Vec<char> = new.chars().collect();

    let mut parts = Vec::new();
    for op in similar::capture_diff_slices(Algorithm::Myers, &old_chars, &new_chars) {
        let (tag, old_range, new_range) = op.as_tag_tuple();
        match tag {
            DiffTag::Equal => parts.push(format!("={}", old_range.len())),
            DiffTag::Delete => parts.push(format!("-{}", old_range.len())),
            DiffTag::Insert => parts.push(insertion(&new_chars[new_range])),
            DiffTag::Replace => {
                parts.push(format!("-{}", old_range.len()));
                parts.push(insertion(&new_chars[new_range]));
            }
        }
    }
    parts.join("\t")
}

fn insertion(chars: &[char]) -> String {
    let mut out = String::with_capacity(chars.len() + 1);
    out.push('+');
    for c in chars {
        match c {
            '%' => out.push_str("%25"),
            '\t' => out.push_str("%09"),
            c => out.push(*c),
        }
    }
    out
}

fn unescape(text: &str) -> Result<String, DiffError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3);
        match code {
            Some("25") => out.push('%'),
            Some("09") => out.push('\t'),
            _ => return Err(DiffError::InvalidDelta(format!("bad escape in {:?}", text))),
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Ok(out)
}

pub fn patch_text(old: &str, delta: &str) -> Result<String, DiffError> {
    let chars: Vec<char> = old.chars().collect();
    let mut cursor = 0usize;
    let mut out = String::with_capacity(old.len());

    let count = |token: &str| -> Result<usize, DiffError> {
        token[1..]
            .parse::<usize>()
            .map_err(|_| DiffError::InvalidDelta(format!("bad length in {:?}", token)))
    };

    for token in delta.split('\t').filter(|t| !t.is_empty()) {
        match token.as_bytes()[0] {
            b'=' => {
                let n = count(token)?;
                let end = cursor + n;
                let kept = chars
                    .get(cursor..end)
                    .ok_or_else(|| DiffError::InvalidDelta(format!("{:?} past end of text", token)))?;
                out.extend(kept);
                cursor = end;
            }
            b'-' => {
                cursor += count(token)?;
                if cursor > chars.len() {
                    return Err(DiffError::InvalidDelta(format!("{:?} past end of text", token)));
                }
            }
            b'+' => out.push_str(&unescape(&token[1..])?),
            _ => return Err(DiffError::InvalidDelta(format!("unknown operation {:?}", token))),
        }
    }
    if cursor != chars.len() {
        return Err(DiffError::InvalidDelta(format!(
            "delta covers {} of {} chars",
            cursor,
            chars.len()
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_delta_round_trip() {
        let pairs = [
            ("hello world", "hello brave new world"),
            ("", "all new"),
            ("all gone", ""),
            ("100% sure\tor not", "50% sure\t\tmaybe"),
            ("привет мир", "привет, большой мир"),
        ];
        for (old, new) in pairs {
            let delta = diff_text(old, new);
            assert_eq!(patch_text(old, &delta).unwrap(), new, "delta {:?}", delta);
        }
    }

    #[test]
    fn test_simple_delta_format() {
        assert_eq!(diff_text("abc", "abXc"), "=2\t+X\t=1");
        assert_eq!(patch_text("abc", "=1\t-1\t=1").unwrap(), "ac");
    }

    #[test]
    fn test_invalid_delta() {
        assert!(patch_text("abc", "=5").is_err());
        assert!(patch_text("abc", "?1").is_err());
        assert!(patch_text("abc", "=1").is_err());
        assert!(patch_text("abc", "=3\t+%zz").is_err());
    }
}
