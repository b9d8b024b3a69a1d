pub mod telegram;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use metrics::counter;

/// Messaging-channel sends, one method per payload shape. Implementations do
/// no retrying; a failure propagates so the run loop can decide what the
/// item's fate is.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<()>;
    async fn send_photo(&self, photo_url: &str, caption: Option<&str>) -> Result<()>;
    /// Caption, when given, is attached to the first item of the group.
    async fn send_media_group(&self, photo_urls: &[String], caption: Option<&str>) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct PayloadLimits {
    pub max_caption_chars: usize,
    pub max_group_size: usize,
}

/// Picks the payload shape for a rendered message and its media, honoring
/// the channel's caption and group-size caps.
pub struct Dispatcher {
    sender: Arc<dyn ChannelSender>,
    limits: PayloadLimits,
}

impl Dispatcher {
    pub fn new(sender: Arc<dyn ChannelSender>, limits: PayloadLimits) -> Self {
        Self { sender, limits }
    }

    pub async fn dispatch(&self, text: &str, media: &[String]) -> Result<()> {
        let caption_fits = text.chars().count() <= self.limits.max_caption_chars;
        match media.len() {
            0 => self.sender.send_text(text).await?,
            1 => {
                if caption_fits {
                    self.sender.send_photo(&media[0], Some(text)).await?;
                } else {
                    self.sender.send_photo(&media[0], None).await?;
                    self.sender.send_text(text).await?;
                }
            }
            _ => {
                let group: Vec<String> = media
                    .iter()
                    .take(self.limits.max_group_size)
                    .cloned()
                    .collect();
                if caption_fits {
                    self.sender.send_media_group(&group, Some(text)).await?;
                } else {
                    self.sender.send_media_group(&group, None).await?;
                    self.sender.send_text(text).await?;
                }
            }
        }
        counter!("relay_messages_dispatched_total").increment(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Text(String),
        Photo { url: String, caption: Option<String> },
        Group { urls: Vec<String>, caption: Option<String> },
    }

    #[derive(Default)]
    struct RecordingSender {
        calls: Mutex<Vec<Call>>,
    }

    impl RecordingSender {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChannelSender for RecordingSender {
        async fn send_text(&self, text: &str) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Text(text.to_string()));
            Ok(())
        }
        async fn send_photo(&self, photo_url: &str, caption: Option<&str>) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Photo {
                url: photo_url.to_string(),
                caption: caption.map(str::to_string),
            });
            Ok(())
        }
        async fn send_media_group(
            &self,
            photo_urls: &[String],
            caption: Option<&str>,
        ) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Group {
                urls: photo_urls.to_vec(),
                caption: caption.map(str::to_string),
            });
            Ok(())
        }
    }

    fn dispatcher(sender: Arc<RecordingSender>) -> Dispatcher {
        Dispatcher::new(
            sender,
            PayloadLimits {
                max_caption_chars: 1000,
                max_group_size: 10,
            },
        )
    }

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://img.example/{i}.jpg")).collect()
    }

    #[tokio::test]
    async fn no_media_sends_plain_text() {
        let sender = Arc::new(RecordingSender::default());
        dispatcher(sender.clone()).dispatch("hi", &[]).await.unwrap();
        assert_eq!(sender.calls(), vec![Call::Text("hi".to_string())]);
    }

    #[tokio::test]
    async fn one_medium_fitting_caption_sends_combined() {
        let sender = Arc::new(RecordingSender::default());
        dispatcher(sender.clone())
            .dispatch("short caption", &urls(1))
            .await
            .unwrap();
        assert_eq!(
            sender.calls(),
            vec![Call::Photo {
                url: "https://img.example/0.jpg".to_string(),
                caption: Some("short caption".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn one_medium_oversize_caption_sends_photo_then_text() {
        let long = "x".repeat(1200);
        let sender = Arc::new(RecordingSender::default());
        dispatcher(sender.clone()).dispatch(&long, &urls(1)).await.unwrap();
        let calls = sender.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0],
            Call::Photo {
                url: "https://img.example/0.jpg".to_string(),
                caption: None,
            }
        );
        assert_eq!(calls[1], Call::Text(long));
    }

    #[tokio::test]
    async fn several_media_fitting_caption_send_one_group() {
        let sender = Arc::new(RecordingSender::default());
        dispatcher(sender.clone())
            .dispatch("album", &urls(3))
            .await
            .unwrap();
        assert_eq!(
            sender.calls(),
            vec![Call::Group {
                urls: urls(3),
                caption: Some("album".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn several_media_oversize_caption_sends_group_then_text() {
        let long = "y".repeat(1001);
        let sender = Arc::new(RecordingSender::default());
        dispatcher(sender.clone()).dispatch(&long, &urls(2)).await.unwrap();
        let calls = sender.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0],
            Call::Group {
                urls: urls(2),
                caption: None,
            }
        );
        assert_eq!(calls[1], Call::Text(long));
    }

    #[tokio::test]
    async fn media_beyond_group_cap_are_dropped() {
        let sender = Arc::new(RecordingSender::default());
        dispatcher(sender.clone())
            .dispatch("big album", &urls(12))
            .await
            .unwrap();
        match &sender.calls()[0] {
            Call::Group { urls, .. } => assert_eq!(urls.len(), 10),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn boundary_caption_exactly_at_limit_still_combines() {
        let exact = "z".repeat(1000);
        let sender = Arc::new(RecordingSender::default());
        dispatcher(sender.clone()).dispatch(&exact, &urls(1)).await.unwrap();
        assert_eq!(sender.calls().len(), 1);
    }

    struct FailingSender;

    #[async_trait]
    impl ChannelSender for FailingSender {
        async fn send_text(&self, _text: &str) -> Result<()> {
            anyhow::bail!("channel down")
        }
        async fn send_photo(&self, _photo_url: &str, _caption: Option<&str>) -> Result<()> {
            anyhow::bail!("channel down")
        }
        async fn send_media_group(
            &self,
            _photo_urls: &[String],
            _caption: Option<&str>,
        ) -> Result<()> {
            anyhow::bail!("channel down")
        }
    }

    #[tokio::test]
    async fn failures_propagate_without_retry() {
        let d = Dispatcher::new(
            Arc::new(FailingSender),
            PayloadLimits {
                max_caption_chars: 1000,
                max_group_size: 10,
            },
        );
        assert!(d.dispatch("hi", &[]).await.is_err());
    }
}
