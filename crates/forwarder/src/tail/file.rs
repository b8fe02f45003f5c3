//! 파일 tailer
//!
//! 로그 파일을 따라가며 새로 추가된 라인을 순서대로 채널에 보냅니다.
//! 현재 위치는 `watch` 채널로 영속화 태스크에 전달되고, 영속화 태스크가
//! 1초마다 그리고 스트림 종료 시 한 번 더 상태 파일에 기록합니다.
//!
//! # 로테이션 감지
//! - 경로의 inode가 바뀌면 (rename 방식 로테이션) 기존 핸들을 끝까지 읽은 뒤
//!   새 파일을 처음부터 엽니다.
//! - 파일 크기가 현재 오프셋보다 작아지면 (copy-truncate) 경고 후 처음부터 다시 읽습니다.
//!   잘리기 직전에 쓰인 라인은 유실될 수 있습니다.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tailpipe_core::config::ReadFrom;
use tailpipe_core::metrics as m;

use super::TailOptions;
use super::state::{StateStore, TailState};
use crate::error::ForwarderError;

/// EOF에서 로테이션 검사 결과
enum RotationCheck {
    Unchanged,
    Rotated,
    Truncated,
}

/// 단일 파일 tailer
pub struct FileTailer {
    path: PathBuf,
    options: TailOptions,
    store: StateStore,
    tx: mpsc::Sender<String>,
    shutdown: CancellationToken,
}

impl FileTailer {
    /// 새 tailer를 생성합니다.
    pub fn new(
        path: PathBuf,
        options: TailOptions,
        store: StateStore,
        tx: mpsc::Sender<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            path,
            options,
            store,
            tx,
            shutdown,
        }
    }

    /// tail을 실행합니다.
    ///
    /// `stop`이 설정되었으면 EOF에서, 아니면 종료 토큰이 취소될 때 반환합니다.
    /// 반환 직전 마지막 위치를 상태 파일에 기록한 뒤 라인 채널을 닫습니다.
    pub async fn run(self) -> Result<(), ForwarderError> {
        let Self {
            path,
            options,
            store,
            tx,
            shutdown,
        } = self;

        let Some(file) = open_when_available(&path, &options, &shutdown).await? else {
            return Ok(());
        };

        let meta = file.metadata().await?;
        let inode = inode_of(&meta);
        let saved = match options.read_from {
            ReadFrom::Last => match store.load().await {
                Ok(state) => Some(state),
                Err(e) => {
                    info!(path = %path.display(), error = %e, "no usable statefile, starting at end");
                    None
                }
            },
            _ => None,
        };
        let offset = start_offset(options.read_from, saved, inode, meta.len());
        info!(
            path = %path.display(),
            statefile = %store.path().display(),
            read_from = %options.read_from,
            offset,
            "starting tailer"
        );

        let (pos_tx, pos_rx) = watch::channel(TailState::new(inode, offset));
        let persister = tokio::spawn(persist_loop(store, pos_rx, options.persist_interval));

        let mut follower = Follower {
            path: &path,
            options: &options,
            tx: &tx,
            pos_tx,
            reader: BufReader::new(file),
            inode,
            offset,
            pending: Vec::new(),
        };
        let result = follower.follow(offset, &shutdown).await;
        drop(follower);

        if let Err(e) = persister.await {
            warn!(path = %path.display(), error = %e, "statefile task failed");
        }
        debug!(path = %path.display(), "tailer finished");
        result
    }
}

/// `read_from` 정책과 저장된 상태로 시작 오프셋을 결정합니다.
///
/// `last`인데 상태가 없으면 끝에서, inode가 다르면 (로테이션된 새 파일) 처음부터 시작합니다.
pub fn start_offset(read_from: ReadFrom, saved: Option<TailState>, inode: u64, len: u64) -> u64 {
    match read_from {
        ReadFrom::Beginning => 0,
        ReadFrom::End => len,
        ReadFrom::Last => match saved {
            None => len,
            Some(state) if state.inode != inode => {
                info!(
                    saved_inode = state.inode,
                    inode, "inode changed since last run, file was rotated; starting at beginning"
                );
                0
            }
            Some(state) => state.offset_u64(),
        },
    }
}

struct Follower<'a> {
    path: &'a Path,
    options: &'a TailOptions,
    tx: &'a mpsc::Sender<String>,
    pos_tx: watch::Sender<TailState>,
    reader: BufReader<File>,
    inode: u64,
    offset: u64,
    pending: Vec<u8>,
}

impl Follower<'_> {
    async fn follow(&mut self, start: u64, shutdown: &CancellationToken) -> Result<(), ForwarderError> {
        self.reader.seek(SeekFrom::Start(start)).await?;
        let mut rotated: Option<(File, u64)> = None;

        loop {
            let read = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                read = self.reader.read_until(b'\n', &mut self.pending) => read?,
            };

            if read > 0 {
                if self.pending.ends_with(b"\n") && !self.emit_pending().await {
                    return Ok(());
                }
                continue;
            }

            // EOF
            if let Some((file, inode)) = rotated.take() {
                // 이전 파일의 마지막 줄에 개행이 없어도 내보낸다
                if !self.pending.is_empty() && !self.emit_pending().await {
                    return Ok(());
                }
                info!(path = %self.path.display(), old_inode = self.inode, inode, "log rotated, reopening");
                metrics::counter!(m::TAIL_ROTATIONS_TOTAL).increment(1);
                self.reader = BufReader::new(file);
                self.inode = inode;
                self.offset = 0;
                self.publish();
                continue;
            }

            if self.options.stop {
                if !self.pending.is_empty() {
                    self.emit_pending().await;
                }
                return Ok(());
            }

            match self.check_rotation().await {
                RotationCheck::Rotated => {
                    match File::open(self.path).await {
                        Ok(file) => {
                            let inode = match file.metadata().await {
                                Ok(meta) => inode_of(&meta),
                                Err(_) => 0,
                            };
                            // 기존 핸들의 남은 데이터를 모두 읽은 뒤 전환
                            rotated = Some((file, inode));
                            continue;
                        }
                        Err(e) => {
                            debug!(path = %self.path.display(), error = %e, "rotated file not yet openable");
                        }
                    }
                }
                RotationCheck::Truncated => {
                    warn!(
                        path = %self.path.display(),
                        offset = self.offset,
                        "file shrank below read offset (copy-truncate?), restarting at beginning"
                    );
                    self.reader.seek(SeekFrom::Start(0)).await?;
                    self.pending.clear();
                    self.offset = 0;
                    self.publish();
                    continue;
                }
                RotationCheck::Unchanged => {}
            }

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.options.follow_interval()) => {}
            }
        }
    }

    /// 버퍼의 라인을 내보내고 위치를 갱신합니다. 수신측이 닫혔으면 `false`.
    async fn emit_pending(&mut self) -> bool {
        self.offset += self.pending.len() as u64;
        let line = String::from_utf8_lossy(&self.pending).trim().to_owned();
        self.pending.clear();

        metrics::counter!(m::TAIL_LINES_READ_TOTAL).increment(1);
        if self.tx.send(line).await.is_err() {
            debug!(path = %self.path.display(), "line receiver closed");
            return false;
        }
        self.publish();
        true
    }

    fn publish(&self) {
        self.pos_tx.send_replace(TailState::new(self.inode, self.offset));
    }

    async fn check_rotation(&self) -> RotationCheck {
        let consumed = self.offset + self.pending.len() as u64;
        match tokio::fs::metadata(self.path).await {
            // 이름이 바뀐 직후 새 파일이 아직 없을 수 있다
            Err(_) => RotationCheck::Unchanged,
            Ok(meta) if inode_of(&meta) != self.inode => RotationCheck::Rotated,
            Ok(meta) if meta.len() < consumed => RotationCheck::Truncated,
            Ok(_) => RotationCheck::Unchanged,
        }
    }
}

/// 파일을 엽니다. 따라가기 모드에서 파일이 아직 없으면 생길 때까지 기다립니다.
async fn open_when_available(
    path: &Path,
    options: &TailOptions,
    shutdown: &CancellationToken,
) -> Result<Option<File>, ForwarderError> {
    let mut warned = false;
    loop {
        match File::open(path).await {
            Ok(file) => return Ok(Some(file)),
            Err(e) if options.stop => {
                return Err(ForwarderError::Tail {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                if !warned {
                    warn!(path = %path.display(), error = %e, "cannot open file yet, waiting for it");
                    warned = true;
                }
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => return Ok(None),
            _ = tokio::time::sleep(options.follow_interval()) => {}
        }
    }
}

/// 위치 스냅샷을 주기적으로, 그리고 tailer 종료 시 한 번 더 기록합니다.
///
/// 기록 실패는 로그만 남기고 tail은 계속됩니다.
async fn persist_loop(mut store: StateStore, mut rx: watch::Receiver<TailState>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let state = *rx.borrow();
                save_logged(&mut store, &state).await;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    let state = *rx.borrow();
    save_logged(&mut store, &state).await;
}

async fn save_logged(store: &mut StateStore, state: &TailState) {
    if let Err(e) = store.save(state).await {
        metrics::counter!(m::TAIL_STATEFILE_WRITE_ERRORS_TOTAL).increment(1);
        warn!(error = %e, "failed to write statefile");
    }
}

#[cfg(unix)]
pub(crate) fn inode_of(meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
pub(crate) fn inode_of(_meta: &std::fs::Metadata) -> u64 {
    0
}
