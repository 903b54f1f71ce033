// src/consensus/leader_rotation.rs
use crate::registry::NodeId;

/// Round-robin over the ordered validator list.
///
/// Returns the validator following `last`, wrapping at the end. The first
/// validator is returned when `last` is absent or unknown, or when only one
/// validator exists. `None` when there are no validators.
pub fn next_validator(validators: &[NodeId], last: Option<&str>) -> Option<NodeId> {
    let first = validators.first()?;
    if validators.len() == 1 {
        return Some(first.clone());
    }
    let Some(last) = last else {
        return Some(first.clone());
    };
    let next = match validators.iter().position(|v| v == last) {
        Some(pos) => (pos + 1) % validators.len(),
        None => 0,
    };
    Some(validators[next].clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<NodeId> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn wraps_around() {
        let vs = ids(&["a", "b", "c"]);
        assert_eq!(next_validator(&vs, Some("a")).as_deref(), Some("b"));
        assert_eq!(next_validator(&vs, Some("c")).as_deref(), Some("a"));
        assert_eq!(next_validator(&vs, None).as_deref(), Some("a"));
        assert_eq!(next_validator(&vs, Some("zz")).as_deref(), Some("a"));
    }

    #[test]
    fn degenerate_sets() {
        assert_eq!(next_validator(&[], Some("a")), None);
        assert_eq!(next_validator(&ids(&["solo"]), Some("solo")).as_deref(), Some("solo"));
    }
}
