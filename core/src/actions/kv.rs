use super::{ActionResponse, Actions};
use crate::profile::ConnectionProfile;
use crate::types::{validate_name, KvConfig, KvEntry, KvStatus};
use crate::CobraError;
use bytes::Bytes;

impl Actions {
    pub async fn list_buckets(&self, profile: &ConnectionProfile) -> ActionResponse<Vec<KvStatus>> {
        self.run("list_buckets", async {
            let data = self.registry.get_data_client(profile).await?;
            data.list_buckets().await
        })
        .await
    }

    pub async fn create_bucket(
        &self,
        profile: &ConnectionProfile,
        config: KvConfig,
    ) -> ActionResponse<KvStatus> {
        self.run("create_bucket", async {
            config.validate()?;
            let data = self.registry.get_data_client(profile).await?;
            data.create_bucket(config).await
        })
        .await
    }

    pub async fn delete_bucket(&self, profile: &ConnectionProfile, bucket: &str) -> ActionResponse<()> {
        self.run("delete_bucket", async {
            validate_name("bucket", bucket)?;
            let data = self.registry.get_data_client(profile).await?;
            data.delete_bucket(bucket).await
        })
        .await
    }

    pub async fn bucket_keys(
        &self,
        profile: &ConnectionProfile,
        bucket: &str,
    ) -> ActionResponse<Vec<String>> {
        self.run("bucket_keys", async {
            validate_name("bucket", bucket)?;
            let data = self.registry.get_data_client(profile).await?;
            data.keys(bucket).await
        })
        .await
    }

    pub async fn get_entry(
        &self,
        profile: &ConnectionProfile,
        bucket: &str,
        key: &str,
    ) -> ActionResponse<KvEntry> {
        self.run("get_entry", async {
            validate_name("bucket", bucket)?;
            let data = self.registry.get_data_client(profile).await?;
            data.get(bucket, key)
                .await?
                .ok_or_else(|| CobraError::NotFound("Entry not found".into()))
        })
        .await
    }

    /// Returns the revision assigned to the new value
    pub async fn put_entry(
        &self,
        profile: &ConnectionProfile,
        bucket: &str,
        key: &str,
        value: &str,
    ) -> ActionResponse<u64> {
        self.run("put_entry", async {
            validate_name("bucket", bucket)?;
            if key.trim().is_empty() {
                return Err(CobraError::Validation("key is required".into()));
            }
            let data = self.registry.get_data_client(profile).await?;
            data.put(bucket, key, Bytes::copy_from_slice(value.as_bytes()))
                .await
        })
        .await
    }
}
