//! The `createAlarm` operation: extract, then publish.

use crate::calendar::{CalendarEvent, CalendarPublisher};
use crate::config::AppConfig;
use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::extraction::ExtractionPipeline;
use crate::record::Readout;
use crate::CalarmError;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Runs one fresh extraction per request and publishes successful readouts.
///
/// Cheap to clone; every request gets its own copy of the context bound to
/// its own cancellation token.
#[derive(Clone)]
pub struct AlarmService {
    ctx: ExecCtx,
    pipeline: ExtractionPipeline,
    publisher: Arc<dyn CalendarPublisher>,
}

impl std::fmt::Debug for AlarmService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlarmService")
            .field("ctx", &self.ctx)
            .field("pipeline", &self.pipeline)
            .field("publisher", &self.publisher.name())
            .finish()
    }
}

impl AlarmService {
    /// Assemble a service from its collaborators.
    pub fn new(
        ctx: ExecCtx,
        pipeline: ExtractionPipeline,
        publisher: Arc<dyn CalendarPublisher>,
    ) -> Self {
        Self {
            ctx,
            pipeline,
            publisher,
        }
    }

    /// Wire a service from validated configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let ctx = config.build_exec_ctx();
        let pipeline = config.build_pipeline()?;
        let publisher = config.build_publisher(ctx.client.clone());
        Ok(Self::new(ctx, pipeline, publisher))
    }

    /// Extract an event from `user_text` and publish it.
    ///
    /// A graceful extraction failure is returned as `Ok` with
    /// `record.error == true` and is not published. Publishing problems are
    /// logged and never change the returned readout.
    pub async fn create_alarm(&self, user_text: &str, cancel: CancellationToken) -> Result<Readout> {
        let user_text = user_text.trim();
        if user_text.is_empty() {
            return Err(CalarmError::InvalidInput("input must not be empty".into()));
        }

        info!(chars = user_text.len(), "creating alarm");
        let ctx = self.ctx.with_cancellation(cancel);
        let readout = self.pipeline.run(&ctx, user_text).await?;

        match CalendarEvent::from_readout(&readout) {
            Some(event) => match self.publisher.publish(&event).await {
                Ok(published) => info!(
                    publisher = self.publisher.name(),
                    id = ?published.id,
                    "alarm published"
                ),
                Err(e) => warn!(publisher = self.publisher.name(), error = %e, "failed to publish alarm"),
            },
            None => warn!("extraction exhausted its retry budget, nothing to publish"),
        }

        Ok(readout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::calendar::PublishedEvent;
    use crate::clock::FixedClock;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const VALID: &str = r#"{"name": "Test CalendarAPI Setup", "category": "home", "lead_time": 13,
 "event_time": "2024-05-04T15:30:00-04:00", "event_time_end": "2024-05-04T15:40:00-04:00",
 "location": "home", "error": false} DONE"#;

    #[derive(Default)]
    struct RecordingPublisher {
        events: Mutex<Vec<CalendarEvent>>,
        fail: bool,
    }

    #[async_trait]
    impl CalendarPublisher for RecordingPublisher {
        async fn publish(&self, event: &CalendarEvent) -> Result<PublishedEvent> {
            self.events.lock().unwrap().push(event.clone());
            if self.fail {
                return Err(CalarmError::PublishFailed("HTTP 401: expired".into()));
            }
            Ok(PublishedEvent {
                id: Some("evt1".into()),
                ..Default::default()
            })
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn service(response: &str, publisher: Arc<RecordingPublisher>) -> (AlarmService, Arc<MockBackend>) {
        let mock = Arc::new(MockBackend::fixed(response));
        let ctx = ExecCtx::builder("http://unused")
            .backend(mock.clone())
            .clock(Arc::new(FixedClock::parse("2024-05-04T14:27:50-04:00").unwrap()))
            .build();
        let pipeline = ExtractionPipeline::new(2).unwrap();
        (AlarmService::new(ctx, pipeline, publisher), mock)
    }

    #[tokio::test]
    async fn test_success_is_published() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (service, _) = service(VALID, publisher.clone());

        let readout = service
            .create_alarm("Test CalendarAPI Setup at 3:30pm", CancellationToken::new())
            .await
            .unwrap();

        assert!(readout.is_success());
        let events = publisher.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].summary, readout.display_text);
    }

    #[tokio::test]
    async fn test_exhausted_extraction_not_published() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (service, mock) = service("no idea DONE", publisher.clone());

        let readout = service
            .create_alarm("gibberish", CancellationToken::new())
            .await
            .unwrap();

        assert!(readout.record.error);
        assert_eq!(mock.calls(), 3);
        assert!(publisher.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_readout() {
        let publisher = Arc::new(RecordingPublisher {
            fail: true,
            ..Default::default()
        });
        let (service, _) = service(VALID, publisher.clone());

        let readout = service
            .create_alarm("Test CalendarAPI Setup at 3:30pm", CancellationToken::new())
            .await
            .unwrap();

        assert!(readout.is_success());
        assert_eq!(publisher.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_blank_input_rejected_without_generator_call() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (service, mock) = service(VALID, publisher);

        let err = service
            .create_alarm("   \n", CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, CalarmError::InvalidInput(_)));
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_token_propagates() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (service, mock) = service(VALID, publisher.clone());
        let token = CancellationToken::new();
        token.cancel();

        let err = service.create_alarm("lunch", token).await.unwrap_err();

        assert!(matches!(err, CalarmError::Cancelled));
        assert_eq!(mock.calls(), 0);
        assert!(publisher.events.lock().unwrap().is_empty());
    }
}
