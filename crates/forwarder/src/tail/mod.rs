//! 입력 tail -- glob 확장, 파일/표준입력 tailer 생성
//!
//! 각 입력은 독립된 tailer 태스크와 라인 채널을 가집니다.
//! 파일 간 순서는 보장하지 않으며, 한 파일 안에서는 읽은 순서대로 라인을 보냅니다.

pub mod file;
pub mod state;
mod stdin;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tailpipe_core::config::{ReadFrom, TailConfig};

use crate::error::ForwarderError;
use file::FileTailer;
use state::{STATEFILE_SUFFIX, StateStore, resolve_statefile};

pub use state::TailState;

/// 표준 입력을 나타내는 경로
pub const STDIN_PATH: &str = "-";

/// watch 모드에서 EOF 이후 변경을 확인하는 주기
const WATCH_INTERVAL: Duration = Duration::from_millis(250);

/// 위치 영속화 주기
const PERSIST_INTERVAL: Duration = Duration::from_secs(1);

/// 라인 채널 용량
const DEFAULT_LINE_CAPACITY: usize = 1000;

/// tailer 동작 옵션
#[derive(Debug, Clone)]
pub struct TailOptions {
    /// 시작 위치 정책
    pub read_from: ReadFrom,
    /// EOF에서 종료할지 여부
    pub stop: bool,
    /// 폴링 모드 여부
    pub poll: bool,
    /// 폴링 주기
    pub poll_interval: Duration,
    /// 사용자 지정 상태 파일 경로
    pub statefile: Option<PathBuf>,
    /// 임시 파일 + rename으로 상태를 기록할지 여부
    pub atomic_statefile: bool,
    /// 위치 영속화 주기
    pub persist_interval: Duration,
    /// 라인 채널 용량
    pub line_capacity: usize,
}

impl TailOptions {
    /// 설정에서 옵션을 생성합니다.
    pub fn from_config(config: &TailConfig) -> Self {
        Self {
            read_from: config.read_from,
            stop: config.stop,
            poll: config.poll,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            statefile: (!config.statefile.is_empty()).then(|| PathBuf::from(&config.statefile)),
            atomic_statefile: config.atomic_statefile,
            persist_interval: PERSIST_INTERVAL,
            line_capacity: DEFAULT_LINE_CAPACITY,
        }
    }

    /// EOF 이후 다음 확인까지 대기 시간
    pub fn follow_interval(&self) -> Duration {
        if self.poll {
            self.poll_interval
        } else {
            WATCH_INTERVAL
        }
    }
}

impl Default for TailOptions {
    fn default() -> Self {
        Self::from_config(&TailConfig::default())
    }
}

/// tail 대상
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum TailInput {
    /// 파일
    File(PathBuf),
    /// 표준 입력
    Stdin,
}

impl TailInput {
    /// 로그에 사용할 이름
    pub fn name(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Stdin => STDIN_PATH.to_owned(),
        }
    }
}

/// 실행 중인 tailer
pub struct TailHandle {
    /// 입력 이름
    pub name: String,
    /// 라인 수신 채널 (tailer 종료 시 닫힘)
    pub lines: mpsc::Receiver<String>,
    /// tailer 태스크
    pub task: JoinHandle<Result<(), ForwarderError>>,
}

/// 경로 패턴을 tail 대상 목록으로 확장합니다.
///
/// 상태 파일 접미어로 끝나거나 지정 상태 파일과 같은 경로는 제외합니다.
/// 일치하는 파일이 없는 리터럴 경로는 그대로 유지해 나중에 생기기를 기다립니다.
/// 결과가 비어 있으면 에러입니다.
pub fn expand_inputs(
    patterns: &[String],
    statefile: Option<&Path>,
) -> Result<Vec<TailInput>, ForwarderError> {
    let mut files = BTreeSet::new();
    let mut stdin = false;

    for pattern in patterns {
        if pattern == STDIN_PATH {
            stdin = true;
            continue;
        }

        let paths = glob::glob(pattern).map_err(|e| ForwarderError::Glob {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;

        let mut matched = false;
        for entry in paths {
            match entry {
                Ok(path) => {
                    matched = true;
                    if !is_statefile(&path, statefile) && !path.is_dir() {
                        files.insert(path);
                    }
                }
                Err(e) => warn!(pattern = %pattern, error = %e, "skipping unreadable glob match"),
            }
        }

        if !matched && !has_glob_meta(pattern) {
            debug!(path = %pattern, "file does not exist yet, will wait for it");
            let path = PathBuf::from(pattern);
            if !is_statefile(&path, statefile) {
                files.insert(path);
            }
        }
    }

    let mut inputs: Vec<TailInput> = files.into_iter().map(TailInput::File).collect();
    if stdin {
        inputs.push(TailInput::Stdin);
    }

    if inputs.is_empty() {
        return Err(ForwarderError::Config {
            field: "tail.paths".to_owned(),
            reason: format!("no files to tail matched {patterns:?}"),
        });
    }
    Ok(inputs)
}

fn is_statefile(path: &Path, statefile: Option<&Path>) -> bool {
    let suffixed = path
        .file_name()
        .is_some_and(|n| n.to_string_lossy().ends_with(STATEFILE_SUFFIX));
    suffixed || statefile.is_some_and(|s| same_file(s, path))
}

/// 표기가 달라도 (`./`, 심볼릭 링크 등) 같은 파일이면 `true`
fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn has_glob_meta(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// 각 입력에 대해 tailer 태스크를 생성합니다.
///
/// `shutdown`이 취소되면 tailer는 마지막 위치를 기록하고 라인 채널을 닫습니다.
pub fn spawn_tailers(
    inputs: &[TailInput],
    options: &TailOptions,
    shutdown: &CancellationToken,
) -> Vec<TailHandle> {
    let file_count = inputs
        .iter()
        .filter(|i| matches!(i, TailInput::File(_)))
        .count();

    inputs
        .iter()
        .map(|input| {
            let (tx, rx) = mpsc::channel(options.line_capacity);
            let task = match input {
                TailInput::File(path) => {
                    let statefile =
                        resolve_statefile(path, options.statefile.as_deref(), file_count);
                    let store = StateStore::new(statefile, options.atomic_statefile);
                    let tailer = FileTailer::new(
                        path.clone(),
                        options.clone(),
                        store,
                        tx,
                        shutdown.child_token(),
                    );
                    tokio::spawn(tailer.run())
                }
                TailInput::Stdin => tokio::spawn(stdin::tail_stdin(tx, shutdown.child_token())),
            };
            TailHandle {
                name: input.name(),
                lines: rx,
                task,
            }
        })
        .collect()
}
