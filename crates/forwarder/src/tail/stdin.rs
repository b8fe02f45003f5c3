//! 표준 입력 tailer (상태 파일 없음, 입력 EOF에서 종료)

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tailpipe_core::metrics as m;

use crate::error::ForwarderError;

pub(super) async fn tail_stdin(
    tx: mpsc::Sender<String>,
    shutdown: CancellationToken,
) -> Result<(), ForwarderError> {
    tail_reader(BufReader::new(tokio::io::stdin()), tx, shutdown).await?;
    debug!("stdin closed");
    Ok(())
}

/// 입력이 끝나거나 종료 토큰이 취소될 때까지 라인 단위로 보냅니다.
pub(super) async fn tail_reader<R>(
    reader: R,
    tx: mpsc::Sender<String>,
    shutdown: CancellationToken,
) -> Result<(), ForwarderError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = lines.next_line() => next?,
        };
        let Some(line) = next else {
            break;
        };

        metrics::counter!(m::TAIL_LINES_READ_TOTAL).increment(1);
        if tx.send(line.trim().to_owned()).await.is_err() {
            break;
        }
    }
    Ok(())
}
