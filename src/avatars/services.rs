use anyhow::Context;
use bytes::Bytes;
use tracing::warn;
use uuid::Uuid;

use crate::state::AppState;

pub struct UploadItem {
    pub body: Bytes,
    pub content_type: String,
}

/// Validate and store a profile picture, returning the new object key.
/// Keys are fresh per upload, so an existing picture is never overwritten;
/// replaced objects are simply orphaned.
pub async fn store_avatar(
    st: &AppState,
    user_id: Uuid,
    item: UploadItem,
) -> anyhow::Result<String> {
    let ext = ext_from_mime(&item.content_type)
        .ok_or_else(|| anyhow::anyhow!("unsupported image type {}", item.content_type))?;
    anyhow::ensure!(
        item.body.len() <= st.config.policy.max_avatar_bytes,
        "image exceeds {} bytes",
        st.config.policy.max_avatar_bytes
    );
    anyhow::ensure!(!item.body.is_empty(), "empty image");

    let key = format!("avatars/{}/{}.{}", user_id, Uuid::new_v4(), ext);
    st.storage
        .put_object(&key, item.body, &item.content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;
    Ok(key)
}

/// Temporary GET URL for a stored avatar key.
pub async fn presign(st: &AppState, key: &str) -> anyhow::Result<String> {
    st.storage
        .presign_get(key, st.config.policy.avatar_url_ttl_secs)
        .await
        .with_context(|| format!("presign url for {}", key))
}

/// Best-effort cleanup when an account goes away; never fails the caller.
pub async fn remove(st: &AppState, key: &str) {
    if let Err(e) = st.storage.delete_object(key).await {
        warn!(error = %e, key, "failed to delete avatar object");
    }
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}
