/// Extracts the bare, lowercased address from a header value such as
/// `"Jane Doe <jane@co.com>"` or `jane@co.com`. The angle-bracket form wins
/// when present.
pub fn extract_address(header: &str) -> Option<String> {
    let value = header.trim();
    if value.is_empty() {
        return None;
    }

    if let (Some(open), Some(close)) = (value.rfind('<'), value.rfind('>')) {
        if close > open {
            let inner = value[open + 1..close].trim();
            if !inner.is_empty() {
                return Some(inner.to_lowercase());
            }
        }
    }

    let bare = value.trim_matches(|ch| ch == '"' || ch == '\'' || ch == '<' || ch == '>');
    let bare = bare.trim();
    if bare.is_empty() {
        return None;
    }

    Some(bare.to_lowercase())
}

/// Splits an address-list header on commas outside quoted display names.
pub fn split_address_list(header: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_angle = false;

    for ch in header.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            '<' => {
                in_angle = true;
                current.push(ch);
            }
            '>' => {
                in_angle = false;
                current.push(ch);
            }
            ',' if !in_quotes && !in_angle => {
                if let Some(address) = extract_address(&current) {
                    out.push(address);
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    if let Some(address) = extract_address(&current) {
        out.push(address);
    }

    out
}

pub fn same_address(header: &str, address: &str) -> bool {
    match (extract_address(header), extract_address(address)) {
        (Some(left), Some(right)) => left == right,
        _ => false,
    }
}
