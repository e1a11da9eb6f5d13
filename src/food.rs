#[derive(Clone, Copy, Debug, serde::Serialize, PartialEq, Eq)]
pub enum Food {
    #[serde(rename(serialize = "F"))]
    Fruit,
    #[serde(rename(serialize = "P"))]
    Power,
}
