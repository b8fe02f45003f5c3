//! tail 위치 영속화 -- 파일별 (inode, offset) 상태 파일
//!
//! 상태 파일은 `{"INode": <u64>, "Offset": <i64>}` 형식의 작은 JSON 파일입니다.
//! 기본 모드는 같은 파일 핸들을 유지하며 매번 잘라낸 뒤 오프셋 0에 다시 씁니다.
//! 이 방식은 기록 도중 프로세스가 죽으면 파일이 비거나 잘릴 수 있으므로,
//! `atomic` 모드에서는 임시 파일에 쓴 뒤 rename 합니다.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use crate::error::ForwarderError;

/// 상태 파일 이름 접미어 (glob 확장 시 자기 자신을 tail하지 않도록 제외)
pub const STATEFILE_SUFFIX: &str = ".tailpipe.state";

/// 파일별 tail 위치
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TailState {
    /// 물리 파일 식별자
    #[serde(rename = "INode")]
    pub inode: u64,
    /// 다음에 읽을 바이트 오프셋
    #[serde(rename = "Offset")]
    pub offset: i64,
}

impl TailState {
    /// 새 상태를 생성합니다.
    pub fn new(inode: u64, offset: u64) -> Self {
        Self {
            inode,
            offset: i64::try_from(offset).unwrap_or(i64::MAX),
        }
    }

    /// 오프셋을 부호 없는 값으로 반환합니다 (음수는 0).
    pub fn offset_u64(&self) -> u64 {
        u64::try_from(self.offset).unwrap_or(0)
    }
}

/// 상태 파일 저장소
///
/// 하나의 tail 대상에 대해 단일 태스크만 소유합니다.
pub struct StateStore {
    path: PathBuf,
    atomic: bool,
    handle: Option<File>,
}

impl StateStore {
    /// 새 저장소를 생성합니다. 파일은 첫 기록 시점에 열립니다.
    pub fn new(path: impl Into<PathBuf>, atomic: bool) -> Self {
        Self {
            path: path.into(),
            atomic,
            handle: None,
        }
    }

    /// 상태 파일 경로를 반환합니다.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 저장된 상태를 읽습니다.
    pub async fn load(&self) -> Result<TailState, ForwarderError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| self.error(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| self.error(format!("malformed state: {e}")))
    }

    /// 상태를 기록합니다.
    pub async fn save(&mut self, state: &TailState) -> Result<(), ForwarderError> {
        let payload = serde_json::to_vec(state).map_err(|e| self.error(e.to_string()))?;
        if self.atomic {
            self.save_atomic(&payload).await
        } else {
            self.save_in_place(&payload).await
        }
    }

    async fn save_in_place(&mut self, payload: &[u8]) -> Result<(), ForwarderError> {
        if self.handle.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&self.path)
                .await
                .map_err(|e| self.error(e.to_string()))?;
            self.handle = Some(file);
        }

        let result = match self.handle.as_mut() {
            Some(file) => write_at_start(file, payload).await,
            None => return Err(self.error("statefile handle unavailable".to_owned())),
        };

        if let Err(e) = result {
            // 다음 기록에서 다시 연다
            self.handle = None;
            return Err(self.error(e.to_string()));
        }
        Ok(())
    }

    async fn save_atomic(&mut self, payload: &[u8]) -> Result<(), ForwarderError> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let write = async {
            let mut file = File::create(&tmp).await?;
            file.write_all(payload).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp, &self.path).await
        };
        write.await.map_err(|e| self.error(e.to_string()))
    }

    fn error(&self, reason: String) -> ForwarderError {
        ForwarderError::StateFile {
            path: self.path.display().to_string(),
            reason,
        }
    }
}

async fn write_at_start(file: &mut File, payload: &[u8]) -> std::io::Result<()> {
    file.set_len(0).await?;
    file.seek(SeekFrom::Start(0)).await?;
    file.write_all(payload).await?;
    file.flush().await
}

/// 로그 파일에 대응하는 상태 파일 경로를 결정합니다.
///
/// 우선순위:
/// 1. 지정 경로가 있고, tail 대상이 정확히 하나이며, 경로가 없거나 디렉토리가 아니면 그대로 사용
/// 2. 지정 경로가 기존 디렉토리면 그 안에 `<basename>.tailpipe.state`
/// 3. 그 외에는 시스템 임시 디렉토리에 `<basename>.tailpipe.state`
pub fn resolve_statefile(log_path: &Path, configured: Option<&Path>, file_count: usize) -> PathBuf {
    let derived = derived_name(log_path);

    if let Some(configured) = configured {
        match std::fs::metadata(configured) {
            Ok(meta) if meta.is_dir() => return configured.join(derived),
            Ok(_) | Err(_) if file_count == 1 => return configured.to_path_buf(),
            _ => {
                tracing::warn!(
                    statefile = %configured.display(),
                    files = file_count,
                    "statefile path is not a directory but several files are tailed, using temp dir"
                );
            }
        }
    }

    std::env::temp_dir().join(derived)
}

fn derived_name(log_path: &Path) -> String {
    let base = log_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "stdin".to_owned());
    format!("{base}{STATEFILE_SUFFIX}")
}
