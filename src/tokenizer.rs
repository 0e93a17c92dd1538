//! Token Counting Utility
//!
//! Heuristic token estimation used for history budgeting. Exact tokenizer
//! vocabularies differ per provider; for pruning decisions a conservative
//! approximation is enough.

use crate::types::Message;

/// Estimator for token counts to avoid expensive BPE for pruning decisions.
pub struct TokenEstimator;

impl TokenEstimator {
    /// Estimate token count for a single history message, attachments
    /// included.
    pub fn estimate_message_tokens(message: &Message) -> usize {
        let mut tokens = 4; // Message overhead
        tokens += Self::estimate_text_tokens(&message.content);
        if let Some(quote) = &message.quote {
            tokens += Self::estimate_text_tokens(quote);
        }
        if let Some(image) = &message.image {
            tokens += match (image.width, image.height) {
                (Some(w), Some(h)) => Self::estimate_image_tokens(w, h),
                // Dimensions unknown, assume a large image.
                _ => 1000,
            };
        }
        tokens
    }

    /// Lightweight heuristic: roughly 3 chars per token, erring low for code
    /// and non-English text.
    pub fn estimate_text_tokens(text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        (text.len() / 3).max(1)
    }

    /// Tile-based cost for an inlined image, mirroring the vision pricing
    /// model: the image is scaled into a 2048px box, the short side to 768px,
    /// then billed at 170 tokens per 512px tile plus a flat 85.
    pub fn estimate_image_tokens(width: u32, height: u32) -> usize {
        if width == 0 || height == 0 {
            return 85;
        }

        let (mut w, mut h) = (width as f64, height as f64);

        let max_side = w.max(h);
        if max_side > 2048.0 {
            let scale = 2048.0 / max_side;
            w *= scale;
            h *= scale;
        }

        let min_side = w.min(h);
        if min_side > 768.0 {
            let scale = 768.0 / min_side;
            w *= scale;
            h *= scale;
        }

        let tiles = (w / 512.0).ceil() * (h / 512.0).ceil();
        (tiles as usize) * 170 + 85
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Message, Role};

    #[test]
    fn test_text_estimation() {
        assert_eq!(TokenEstimator::estimate_text_tokens(""), 0);
        assert_eq!(TokenEstimator::estimate_text_tokens("ab"), 1);
        assert_eq!(TokenEstimator::estimate_text_tokens("abcdef"), 2);
    }

    #[test]
    fn test_message_estimation_includes_quote_and_image() {
        let mut message = Message::new(Role::User, "Hello, how are you?");
        let plain = TokenEstimator::estimate_message_tokens(&message);

        message.quote = Some("earlier remark".to_string());
        message.image = Some(crate::types::FileRef::new("img.png", "png"));
        let loaded = TokenEstimator::estimate_message_tokens(&message);

        assert!(loaded > plain + 1000);
    }

    #[test]
    fn test_message_estimation_uses_known_image_dimensions() {
        let mut message = Message::new(Role::User, "see attached");
        let plain = TokenEstimator::estimate_message_tokens(&message);

        message.image =
            Some(crate::types::FileRef::new("img.png", "png").with_dimensions(512, 512));
        let sized = TokenEstimator::estimate_message_tokens(&message);
        assert_eq!(sized, plain + 255);
    }

    #[test]
    fn test_image_tile_math() {
        // 512x512 fits in one tile.
        assert_eq!(TokenEstimator::estimate_image_tokens(512, 512), 255);
        // 1024x1024 is four tiles.
        assert_eq!(TokenEstimator::estimate_image_tokens(1024, 1024), 765);
        // Oversized images are scaled down before tiling.
        let huge = TokenEstimator::estimate_image_tokens(4096, 4096);
        assert_eq!(huge, 765);
        // Unknown dimensions charge the flat overhead.
        assert_eq!(TokenEstimator::estimate_image_tokens(0, 0), 85);
    }
}
