use std::borrow::Cow;

const TOKEN_FIELDS: [&str; 2] = ["\"accessToken\"", "\"refreshToken\""];
const JWT_PREFIX: &str = "eyJ";

fn is_token_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' || ch == '.' || ch == '='
}

/// Blanks the string value of `"accessToken": "..."` style JSON fields.
pub fn redact_token_fields(input: &str) -> Cow<'_, str> {
    let mut redacted = input.to_string();

    for field in TOKEN_FIELDS {
        if !redacted.contains(field) {
            continue;
        }
        let mut out = String::with_capacity(redacted.len());
        let mut rest = redacted.as_str();
        while let Some(idx) = rest.find(field) {
            let end = idx + field.len();
            out.push_str(&rest[..end]);
            rest = &rest[end..];

            // Keep `: "` as written, then drop everything up to the closing quote.
            let Some(open) = rest.find('"') else {
                break;
            };
            if !rest[..open].chars().all(|c| c == ':' || c.is_whitespace()) {
                continue;
            }
            out.push_str(&rest[..=open]);
            rest = &rest[open + 1..];
            let close = rest.find('"').unwrap_or(rest.len());
            out.push_str("REDACTED");
            rest = &rest[close..];
        }
        out.push_str(rest);
        redacted = out;
    }

    if redacted == input {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(redacted)
    }
}

fn redact_jwt_like(text: String) -> String {
    if !text.contains(JWT_PREFIX) {
        return text;
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    while let Some(idx) = rest.find(JWT_PREFIX) {
        out.push_str(&rest[..idx]);
        rest = &rest[idx..];
        let mut consumed = 0;
        for ch in rest.chars() {
            if !is_token_char(ch) {
                break;
            }
            consumed += ch.len_utf8();
        }
        if rest[..consumed].matches('.').count() >= 2 {
            out.push_str("REDACTED");
        } else {
            out.push_str(&rest[..consumed]);
        }
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    out
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let nee = needle.as_bytes();
    if nee.is_empty() {
        return Some(0);
    }
    if nee.len() > hay.len() {
        return None;
    }

    (0..=hay.len() - nee.len()).find(|&i| {
        hay[i..i + nee.len()]
            .iter()
            .zip(nee)
            .all(|(a, b)| a.to_ascii_lowercase() == b.to_ascii_lowercase())
    })
}

fn redact_header_value(text: String, header: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    loop {
        let Some(idx) = find_ascii_case_insensitive(rest, header) else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..idx + header.len()]);
        rest = &rest[idx + header.len()..];

        if let Some(stripped) = rest.strip_prefix(' ') {
            out.push(' ');
            rest = stripped;
        }

        let consumed = rest.find(['\n', '\r']).unwrap_or(rest.len());
        out.push_str(replacement);
        rest = &rest[consumed..];
    }
    out
}

/// Scrubs anything that looks like a credential before text reaches logs or the UI.
pub fn redact_secrets(input: &str) -> Cow<'_, str> {
    let mut value = redact_token_fields(input).into_owned();
    value = redact_header_value(value, "Authorization: Bearer", "REDACTED");
    value = redact_jwt_like(value);

    if value == input {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(value)
    }
}
