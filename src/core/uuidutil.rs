use uuid::Uuid;

pub trait UuidGenerator: Send + Sync {
    fn generate(&self) -> Result<String, anyhow::Error>;
}

/// Random v4 uuids
pub struct UuidV4Generator;

impl UuidGenerator for UuidV4Generator {
    fn generate(&self) -> Result<String, anyhow::Error> {
        Ok(Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v4_uuids_are_unique_and_parse() {
        let a = UuidV4Generator.generate().unwrap();
        let b = UuidV4Generator.generate().unwrap();

        assert_ne!(a, b);
        assert_eq!(Uuid::parse_str(&a).unwrap().get_version_num(), 4);
    }
}
