//! 표준 출력 전송기
//!
//! 실제 수집 엔드포인트 대신 이벤트를 한 줄짜리 JSON으로 출력하고
//! 상태 코드 200 응답을 돌려줍니다. 로컬 실행과 테스트에 사용합니다.

use std::sync::Mutex;
use std::time::Instant;

use serde_json::json;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

use tailpipe_core::error::TailpipeError;
use tailpipe_core::event::{DeliveryResponse, Event};
use tailpipe_core::pipeline::{BoxFuture, Transmission};

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// 표준 출력 전송기
pub struct StdoutTransmission {
    writer: tokio::sync::Mutex<BoxWriter>,
    responses: Mutex<Option<mpsc::Sender<DeliveryResponse>>>,
    block_on_response: bool,
}

impl StdoutTransmission {
    /// 표준 출력에 쓰는 전송기와 응답 수신 채널을 생성합니다.
    pub fn new(
        block_on_response: bool,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<DeliveryResponse>) {
        Self::with_writer(Box::new(tokio::io::stdout()), block_on_response, capacity)
    }

    /// 임의의 writer에 쓰는 전송기를 생성합니다.
    pub fn with_writer(
        writer: BoxWriter,
        block_on_response: bool,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<DeliveryResponse>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let transmission = Self {
            writer: tokio::sync::Mutex::new(writer),
            responses: Mutex::new(Some(tx)),
            block_on_response,
        };
        (transmission, rx)
    }

    fn response_sender(&self) -> Option<mpsc::Sender<DeliveryResponse>> {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn write_event(&self, event: &Event) -> Result<(), TailpipeError> {
        let line = json!({
            "time": event.timestamp.to_rfc3339(),
            "samplerate": event.effective_sample_rate(),
            "data": event.data,
        });
        let mut buf = serde_json::to_vec(&line)
            .map_err(|e| TailpipeError::Transmission(e.to_string()))?;
        buf.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }
}

impl Transmission for StdoutTransmission {
    fn send_presampled(&self, event: Event) -> BoxFuture<'_, Result<(), TailpipeError>> {
        Box::pin(async move {
            let started = Instant::now();
            let mut response = match self.write_event(&event).await {
                Ok(()) => DeliveryResponse::ok(event, started.elapsed()),
                Err(e) => {
                    let mut response = DeliveryResponse::with_status(event, 0, started.elapsed());
                    response.err = Some(e.to_string());
                    response
                }
            };
            response.duration = started.elapsed();

            let Some(tx) = self.response_sender() else {
                return Err(TailpipeError::Transmission("transmission closed".to_owned()));
            };
            if self.block_on_response {
                tx.send(response)
                    .await
                    .map_err(|_| TailpipeError::Transmission("response receiver closed".to_owned()))
            } else {
                if tx.try_send(response).is_err() {
                    debug!("response channel full, dropping response");
                }
                Ok(())
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let _ = self.writer.lock().await.flush().await;
            self.responses
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();
        })
    }
}
