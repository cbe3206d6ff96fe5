use teloxide::prelude::*;
use teloxide::types::FileId;
use tracing::warn;

use crate::error::AppError;
use crate::handlers::responses::show;
use crate::handlers::{keyboards, texts, HandlerResult, Origin};
use crate::state::AppState;
use crate::utils::telegram::download_file_bytes;

/// Picks the largest photo size, or an image sent as a document.
pub fn training_file(message: &Message) -> Option<FileId> {
    if let Some(sizes) = message.photo() {
        return sizes.iter().max_by_key(|size| size.width * size.height).map(|size| size.file.id.clone());
    }
    message
        .document()
        .filter(|document| {
            document
                .mime_type
                .as_ref()
                .is_some_and(|mime| mime.type_() == "image")
        })
        .map(|document| document.file.id.clone())
}

pub async fn photo_handler(bot: Bot, state: AppState, origin: Origin, file_id: FileId) -> HandlerResult {
    let bytes = download_file_bytes(&bot, &file_id).await?;
    let text = match state.photos.save_photo(origin.user_id, &bytes).await {
        Ok((_, count)) => texts::photo_received(count, state.config.min_training_photos),
        Err(AppError::Validation(reason)) => {
            warn!("Rejected photo from user {}: {reason}", origin.user_id);
            format!("{}\n<i>{reason}</i>", texts::PHOTO_REJECTED)
        }
        Err(err) => return Err(err.into()),
    };
    show(&bot, origin.chat_id, None, &text, Some(keyboards::upload())).await?;
    Ok(())
}
