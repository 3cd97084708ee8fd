// Id port: queue and job ids are minted here, never by callers

/// Source of fresh ids. Output must parse as a UUID (`JobId::parse`, `QueueId::parse`).
pub trait IdProvider: Send + Sync {
    fn generate_id(&self) -> String;
}

/// Random v4 UUIDs
pub struct UuidProvider;

impl IdProvider for UuidProvider {
    fn generate_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}
