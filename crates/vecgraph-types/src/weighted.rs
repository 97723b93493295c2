use serde::{Deserialize, Serialize};

/// An item paired with a weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weighted<T> {
    pub item: T,
    pub weight: f32,
}

impl<T> Weighted<T> {
    pub fn new(item: T, weight: f32) -> Self {
        Self { item, weight }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Weighted<U> {
        Weighted {
            item: f(self.item),
            weight: self.weight,
        }
    }

    pub fn as_ref(&self) -> Weighted<&T> {
        Weighted {
            item: &self.item,
            weight: self.weight,
        }
    }
}

impl<T> From<T> for Weighted<T> {
    fn from(item: T) -> Self {
        Weighted::new(item, 1.0)
    }
}
