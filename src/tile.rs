/// The immutable terrain under a grid slot, fixed at match open.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum BaseTile {
    #[serde(rename(serialize = "L"))]
    Floor,
    #[serde(rename(serialize = "X"))]
    Wall,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_wire_characters() {
        assert_eq!(serde_json::to_string(&BaseTile::Floor).unwrap(), "\"L\"");
        assert_eq!(serde_json::to_string(&BaseTile::Wall).unwrap(), "\"X\"");
    }
}
