//! 이벤트 변환 스테이지
//!
//! 각 스테이지는 이벤트 하나를 받아 변환한 결과를 돌려줍니다.
//! [`StageChain`]은 설정에서 한 번 구성되며, 파일마다 스테이지별 태스크를
//! 띄워 채널로 연결합니다. 입력 채널이 닫히면 출력 채널도 닫힙니다.
//!
//! # 고정 순서
//! presampled → drop → scrub → add → reshape

pub mod fields;
pub mod reshape;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use tailpipe_core::config::StagesConfig;
use tailpipe_core::event::Event;

use crate::error::ForwarderError;
pub use fields::{AddField, DropField, PresampledField, ScrubField};
pub use reshape::{RequestShaper, ShapeOptions};

/// 스테이지 간 채널 용량
pub const STAGE_CHANNEL_CAPACITY: usize = 1000;

/// 이벤트 변환 스테이지
pub trait Stage: Send + Sync {
    /// 로그에 사용할 스테이지 이름
    fn name(&self) -> &str;

    /// 이벤트를 변환합니다. `None`이면 이벤트를 다음 스테이지로 넘기지 않습니다.
    fn apply(&self, event: Event) -> Option<Event>;
}

/// 순서가 고정된 스테이지 목록
#[derive(Clone, Default)]
pub struct StageChain {
    stages: Vec<Arc<dyn Stage>>,
}

impl StageChain {
    /// 빈 체인을 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 스테이지를 체인 끝에 추가합니다.
    pub fn push(&mut self, stage: impl Stage + 'static) {
        self.stages.push(Arc::new(stage));
    }

    /// 설정으로 체인을 구성합니다.
    ///
    /// 잘못된 add 항목이나 reshape 패턴은 여기서 에러가 됩니다.
    pub fn from_config(config: &StagesConfig) -> Result<Self, ForwarderError> {
        let mut chain = Self::new();

        if !config.presampled_field.is_empty() {
            chain.push(PresampledField::new(&config.presampled_field));
        }
        for field in &config.drop_fields {
            chain.push(DropField::new(field));
        }
        for field in &config.scrub_fields {
            chain.push(ScrubField::new(field));
        }
        let adds = config
            .parsed_add_fields()
            .map_err(|e| ForwarderError::Core(e.into()))?;
        for (key, value) in adds {
            chain.push(AddField::new(key, value));
        }
        if !config.request_shape.is_empty() {
            let options = ShapeOptions::from_config(config);
            for field in &config.request_shape {
                chain.push(RequestShaper::new(field, &config.request_patterns, options.clone())?);
            }
        }

        info!(stages = ?chain.names(), "stage chain configured");
        Ok(chain)
    }

    /// 스테이지 수
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// 스테이지가 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// 스테이지 이름 목록
    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// 체인 전체를 이벤트 하나에 동기적으로 적용합니다.
    pub fn apply(&self, event: Event) -> Option<Event> {
        self.stages
            .iter()
            .try_fold(event, |event, stage| stage.apply(event))
    }

    /// 입력 채널에 스테이지 태스크를 연결하고 마지막 출력 채널을 돌려줍니다.
    ///
    /// 스테이지가 없으면 입력 채널을 그대로 돌려줍니다.
    pub fn attach(
        &self,
        input: mpsc::Receiver<Event>,
        capacity: usize,
    ) -> (mpsc::Receiver<Event>, Vec<JoinHandle<()>>) {
        let mut rx = input;
        let mut tasks = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            let (tx, next_rx) = mpsc::channel(capacity);
            tasks.push(tokio::spawn(run_stage(Arc::clone(stage), rx, tx)));
            rx = next_rx;
        }
        (rx, tasks)
    }
}

async fn run_stage(stage: Arc<dyn Stage>, mut rx: mpsc::Receiver<Event>, tx: mpsc::Sender<Event>) {
    while let Some(event) = rx.recv().await {
        let Some(event) = stage.apply(event) else {
            continue;
        };
        if tx.send(event).await.is_err() {
            debug!(stage = stage.name(), "downstream closed");
            return;
        }
    }
}
