//! Parsed svn:// protocol items.

use crate::error::{Result, SvnupError};

/// One token of an svn:// response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SvnItem {
    Word(String),
    Number(u64),
    /// Length-prefixed string; raw bytes, not necessarily UTF-8.
    String(Vec<u8>),
    List(Vec<SvnItem>),
}

impl SvnItem {
    pub fn as_word(&self) -> Option<&str> {
        match self {
            SvnItem::Word(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<u64> {
        match self {
            SvnItem::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            SvnItem::String(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// String item decoded as UTF-8 (lossy).
    pub fn as_text(&self) -> Option<String> {
        self.as_bytes()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn as_list(&self) -> Option<&[SvnItem]> {
        match self {
            SvnItem::List(items) => Some(items),
            _ => None,
        }
    }

    /// First element of an optional `( value )` tuple.
    pub fn optional(&self) -> Option<&SvnItem> {
        self.as_list().and_then(|items| items.first())
    }
}

/// Parse every top-level item in `input`.
pub fn parse_items(input: &[u8]) -> Result<Vec<SvnItem>> {
    let mut stack: Vec<Vec<SvnItem>> = vec![Vec::new()];
    let mut pos = 0;

    while pos < input.len() {
        let b = input[pos];
        if b.is_ascii_whitespace() || b == 0 {
            pos += 1;
        } else if b == b'(' {
            stack.push(Vec::new());
            pos += 1;
        } else if b == b')' {
            if stack.len() < 2 {
                return Err(SvnupError::protocol(format!("unbalanced ')' at offset {pos}")));
            }
            let list = stack.pop().unwrap_or_default();
            push_item(&mut stack, SvnItem::List(list));
            pos += 1;
        } else if b.is_ascii_digit() {
            let start = pos;
            while pos < input.len() && input[pos].is_ascii_digit() {
                pos += 1;
            }
            let n: u64 = std::str::from_utf8(&input[start..pos])
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| SvnupError::protocol("number out of range"))?;
            if pos < input.len() && input[pos] == b':' {
                pos += 1;
                let len = usize::try_from(n)
                    .map_err(|_| SvnupError::protocol("string length out of range"))?;
                let end = pos
                    .checked_add(len)
                    .filter(|end| *end <= input.len())
                    .ok_or_else(|| {
                        SvnupError::protocol(format!(
                            "string of {len} bytes at offset {start} runs past end of response"
                        ))
                    })?;
                push_item(&mut stack, SvnItem::String(input[pos..end].to_vec()));
                pos = end;
            } else {
                push_item(&mut stack, SvnItem::Number(n));
            }
        } else if b.is_ascii_alphabetic() {
            let start = pos;
            while pos < input.len()
                && (input[pos].is_ascii_alphanumeric() || input[pos] == b'-')
            {
                pos += 1;
            }
            let word = String::from_utf8_lossy(&input[start..pos]).into_owned();
            push_item(&mut stack, SvnItem::Word(word));
        } else {
            return Err(SvnupError::protocol(format!(
                "unexpected byte 0x{b:02x} at offset {pos}"
            )));
        }
    }

    if stack.len() != 1 {
        return Err(SvnupError::protocol("unterminated list in response"));
    }
    Ok(stack.pop().unwrap_or_default())
}

fn push_item(stack: &mut [Vec<SvnItem>], item: SvnItem) {
    if let Some(top) = stack.last_mut() {
        top.push(item);
    }
}

/// Parse one response group and return the parameters of a
/// `( success ( ... ) )` reply. A `( failure ( ... ) )` reply becomes a
/// `Server` error carrying the server's messages.
pub fn parse_success(group: &[u8]) -> Result<Vec<SvnItem>> {
    let mut items = parse_items(group)?;
    let Some(SvnItem::List(mut tuple)) = items.pop() else {
        return Err(unexpected(group));
    };
    if tuple.len() < 2 {
        return Err(unexpected(group));
    }
    let params = tuple.swap_remove(1);
    match (tuple[0].as_word(), params) {
        (Some("success"), SvnItem::List(params)) => Ok(params),
        (Some("failure"), SvnItem::List(errors)) => Err(SvnupError::Server {
            message: failure_message(&errors),
        }),
        _ => Err(unexpected(group)),
    }
}

/// Join the message fields of a failure's error chain.
fn failure_message(errors: &[SvnItem]) -> String {
    let messages: Vec<String> = errors
        .iter()
        .filter_map(|e| e.as_list())
        .filter_map(|fields| {
            let code = fields.first().and_then(SvnItem::as_number).unwrap_or(0);
            let text = fields.get(1).and_then(SvnItem::as_text)?;
            Some(if text.is_empty() {
                format!("E{code}")
            } else {
                format!("{text} (E{code})")
            })
        })
        .collect();
    if messages.is_empty() {
        "unknown failure".to_string()
    } else {
        messages.join("; ")
    }
}

fn unexpected(group: &[u8]) -> SvnupError {
    let shown = &group[..group.len().min(256)];
    SvnupError::protocol(format!(
        "unexpected response: {}",
        String::from_utf8_lossy(shown)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_items() {
        let items = parse_items(b"( success ( 42 ( 3:a b ) word-x ) ) ").unwrap();
        assert_eq!(
            items,
            vec![SvnItem::List(vec![
                SvnItem::Word("success".into()),
                SvnItem::List(vec![
                    SvnItem::Number(42),
                    SvnItem::List(vec![SvnItem::String(b"a b".to_vec())]),
                    SvnItem::Word("word-x".into()),
                ]),
            ])]
        );
    }

    #[test]
    fn test_string_may_hold_parentheses() {
        let items = parse_items(b"( 5:((()) ) done").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].optional().and_then(SvnItem::as_bytes), Some(&b"((())"[..]));
        assert_eq!(items[1].as_word(), Some("done"));
    }

    #[test]
    fn test_truncated_string_is_rejected() {
        assert!(parse_items(b"( 10:short )").is_err());
        assert!(parse_items(b"( success ( ").is_err());
        assert!(parse_items(b") ").is_err());
    }

    #[test]
    fn test_parse_success() {
        let params = parse_success(b"( success ( ( ) 0: ) ) ").unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params[1].as_bytes(), Some(&b""[..]));
    }

    #[test]
    fn test_parse_failure_message() {
        let group = b"( failure ( ( 160013 23:File not found: 'x.txt' 27:subversion/libsvn_fs/tree.c 42 ) ) ) ";
        match parse_success(group) {
            Err(SvnupError::Server { message }) => {
                assert_eq!(message, "File not found: 'x.txt' (E160013)");
            }
            other => panic!("expected server error, got {:?}", other),
        }
    }
}
