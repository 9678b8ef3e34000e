//! Class-name table for the mango ripeness model, matching the order the
//! model was trained with.

pub const NAMES: [&str; 2] = ["ripe mango", "unripe mango"];

pub fn name(class_idx: usize) -> &'static str {
    NAMES.get(class_idx).copied().unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_indices_map_to_names() {
        assert_eq!(name(0), "ripe mango");
        assert_eq!(name(1), "unripe mango");
    }

    #[test]
    fn out_of_range_index_is_unknown() {
        assert_eq!(name(7), "unknown");
    }
}
