//! Location hierarchy helpers
//!
//! Locations are comma separated, most specific component first
//! (`ou=people,dc=example,dc=net`). A backslash escapes the following
//! character, so `cn=Doe\, John` is a single component.

/// Split a location into its components
pub fn explode(location: &str) -> Vec<&str> {
    let mut components = Vec::new();
    let mut start = 0;
    let mut escaped = false;

    for (index, c) in location.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            ',' => {
                components.push(location[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
    }

    let tail = location[start..].trim();
    if !tail.is_empty() || !components.is_empty() {
        components.push(tail);
    }
    components
}

/// Strip the leftmost component, returning `None` once nothing is left
pub fn parent(location: &str) -> Option<String> {
    let components = explode(location);
    if components.len() <= 1 {
        return None;
    }
    Some(components[1..].join(","))
}

/// Whether `location` is at or below `root`
pub fn is_within(location: &str, root: &str) -> bool {
    !location.is_empty() && location.contains(root)
}

/// Iterator over `location` and its ancestors that are still within `root`
pub fn walk<'a>(location: &str, root: &'a str) -> Walk<'a> {
    Walk {
        next: Some(location.to_string()),
        root,
    }
}

pub struct Walk<'a> {
    next: Option<String>,
    root: &'a str,
}

impl Iterator for Walk<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let current = self.next.take()?;
        if !is_within(&current, self.root) {
            return None;
        }
        self.next = parent(&current);
        Some(current)
    }
}
