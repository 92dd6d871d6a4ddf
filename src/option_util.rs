use serde::{Deserialize, Serialize};

#[derive(Default, Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum NoneOrSome<T> {
    #[serde(skip_deserializing)]
    #[default]
    Unspecified,
    None,
    One(T),
    Some(Vec<T>),
}

impl<T> NoneOrSome<T> {
    pub fn is_unspecified(&self) -> bool {
        matches!(self, NoneOrSome::Unspecified)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        match self {
            NoneOrSome::Unspecified | NoneOrSome::None => 0,
            NoneOrSome::One(_) => 1,
            NoneOrSome::Some(v) => v.len(),
        }
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            NoneOrSome::Unspecified | NoneOrSome::None => vec![],
            NoneOrSome::One(item) => vec![item],
            NoneOrSome::Some(v) => v,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OneOrSome<T> {
    One(T),
    #[serde(deserialize_with = "validate_non_empty")]
    Some(Vec<T>),
}

fn validate_non_empty<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: serde::de::Deserializer<'de>,
    T: Deserialize<'de>,
{
    let value = Vec::deserialize(d)?;
    if value.is_empty() {
        return Err(serde::de::Error::invalid_value(
            serde::de::Unexpected::Other("empty"),
            &"need at least one element",
        ));
    }
    Ok(value)
}

impl<T> OneOrSome<T> {
    #[cfg(test)]
    pub fn len(&self) -> usize {
        match self {
            OneOrSome::One(_) => 1,
            OneOrSome::Some(v) => v.len(),
        }
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrSome::One(item) => vec![item],
            OneOrSome::Some(v) => v,
        }
    }

    pub fn as_slice(&self) -> &[T] {
        match self {
            OneOrSome::One(item) => std::slice::from_ref(item),
            OneOrSome::Some(v) => v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_or_some_accepts_scalar_and_list() {
        let one: OneOrSome<u16> = serde_yaml::from_str("443").unwrap();
        assert_eq!(one.as_slice(), &[443]);

        let some: OneOrSome<u16> = serde_yaml::from_str("[80, 443]").unwrap();
        assert_eq!(some.len(), 2);
        assert_eq!(some.into_vec(), vec![80, 443]);
    }

    #[test]
    fn test_one_or_some_rejects_empty_list() {
        assert!(serde_yaml::from_str::<OneOrSome<u16>>("[]").is_err());
    }

    #[test]
    fn test_none_or_some_null() {
        let none: NoneOrSome<u16> = serde_yaml::from_str("null").unwrap();
        assert!(!none.is_unspecified());
        assert_eq!(none.len(), 0);
        assert!(NoneOrSome::<u16>::default().is_unspecified());
    }
}
