//! 포워더 오케스트레이션 -- tail부터 전송, 재시도, 통계까지 전체 흐름을 연결합니다.
//!
//! # 내부 아키텍처
//! ```text
//! (파일마다)  Tailer -> Parser -> Stage 1 -> ... -> Stage N --+
//!                                                             +--> primary -> Sender -> Transmission
//! (파일마다)  Tailer -> Parser -> Stage 1 -> ... -> Stage N --+       ^              |
//!                                                                   retry       responses
//!                                                                     |              v
//!                                                                RetryCoordinator -> StatsAggregator
//! ```
//!
//! 모든 설정 에러(glob, 파서, 접두어 정규식, reshape 패턴)는 [`ForwarderBuilder::build`]에서
//! 태스크를 띄우기 전에 드러납니다. 실행 중 단계는 채널이 닫히는 순서로 종료됩니다:
//! tailer가 끝나면 그 파일의 파서와 스테이지가 차례로 끝나고, 모든 파일이 끝나면
//! 기본 큐가 닫혀 전송 루프, 응답 처리, 통계 리포터 순으로 종료합니다.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tailpipe_core::clock::{Clock, SystemClock};
use tailpipe_core::config::TailpipeConfig;
use tailpipe_core::event::{DeliveryResponse, Event};
use tailpipe_core::pipeline::{LineParser, Transmission};
use tailpipe_core::prefix::LinePrefix;

use crate::error::ForwarderError;
use crate::parser::new_parser;
use crate::retry::RetryCoordinator;
use crate::sender::{Sender, SenderReport};
use crate::stage::{STAGE_CHANNEL_CAPACITY, StageChain};
use crate::stats::{ResponseStats, StatsAggregator};
use crate::tail::{TailHandle, TailInput, TailOptions, expand_inputs, spawn_tailers};
use crate::transmission::StdoutTransmission;

/// 포워더 실행 결과
#[derive(Debug, Clone, Default)]
pub struct ForwardReport {
    /// 처리한 입력 수
    pub inputs: usize,
    /// 에러로 끝난 입력 수
    pub failed_inputs: usize,
    /// 전송 루프 집계
    pub sender: SenderReport,
    /// 마지막으로 출력된 응답 통계
    pub final_stats: ResponseStats,
}

/// 구성이 끝난 포워더
pub struct Forwarder {
    config: TailpipeConfig,
    inputs: Vec<TailInput>,
    tail_options: TailOptions,
    clock: Arc<dyn Clock>,
    prefix: Option<Arc<LinePrefix>>,
    chain: StageChain,
    transmission: Arc<dyn Transmission>,
    responses: mpsc::Receiver<DeliveryResponse>,
}

impl Forwarder {
    /// tail 대상 목록
    pub fn inputs(&self) -> &[TailInput] {
        &self.inputs
    }

    /// 변환 스테이지 체인
    pub fn stages(&self) -> &StageChain {
        &self.chain
    }

    /// 모든 입력이 끝나고 남은 이벤트가 전송될 때까지 실행합니다.
    ///
    /// `shutdown`은 tailer만 멈춥니다. 나머지 단계는 채널이 닫히면서 차례로 비워집니다.
    pub async fn run(self, shutdown: CancellationToken) -> Result<ForwardReport, ForwarderError> {
        let Self {
            config,
            inputs,
            tail_options,
            clock,
            prefix,
            chain,
            transmission,
            responses,
        } = self;

        info!(
            inputs = inputs.len(),
            parser = %config.parser.name,
            pool_size = config.sender.pool_size,
            retry = config.sender.retry_on_failure,
            "starting forwarder"
        );

        let mut parsers = Vec::with_capacity(inputs.len());
        for _ in &inputs {
            parsers.push(new_parser(&config.parser, Arc::clone(&clock))?);
        }

        let stats = StatsAggregator::new();
        let stats_done = CancellationToken::new();
        let reporter = tokio::spawn(
            stats
                .clone()
                .run_reporter(Duration::from_secs(config.stats.interval_secs), stats_done.clone()),
        );

        let (sender, primary_tx, retry_queues) = Sender::new(Arc::clone(&transmission), &config.sender);
        let coordinator = RetryCoordinator::new(&config.sender, stats, retry_queues);
        let response_task = tokio::spawn(coordinator.run(responses));
        let sender_task = tokio::spawn(sender.run());

        let mut file_tasks = Vec::with_capacity(inputs.len());
        let handles = spawn_tailers(&inputs, &tail_options, &shutdown);
        for (handle, parser) in handles.into_iter().zip(parsers) {
            file_tasks.push(spawn_input(
                handle,
                parser,
                prefix.clone(),
                &chain,
                primary_tx.clone(),
            ));
        }
        drop(primary_tx);

        let mut failed_inputs = 0;
        for task in file_tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failed_inputs += 1;
                    error!(error = %e, "input failed");
                }
                Err(e) => {
                    failed_inputs += 1;
                    error!(error = %e, "input task panicked");
                }
            }
        }
        debug!("all inputs finished, draining sender");

        let sender_report = sender_task
            .await
            .map_err(|e| ForwarderError::Channel(format!("sender task failed: {e}")))?;
        if let Err(e) = response_task.await {
            warn!(error = %e, "response task failed");
        }
        stats_done.cancel();
        let final_stats = reporter.await.unwrap_or_default();

        info!(
            inputs = inputs.len(),
            failed = failed_inputs,
            sent = sender_report.sent,
            "forwarder finished"
        );
        Ok(ForwardReport {
            inputs: inputs.len(),
            failed_inputs,
            sender: sender_report,
            final_stats,
        })
    }
}

/// 입력 하나의 tail -> 파서 -> 스테이지 -> 기본 큐 흐름을 띄웁니다.
///
/// 반환된 태스크는 이 입력의 모든 이벤트가 기본 큐에 들어간 뒤 끝납니다.
fn spawn_input(
    handle: TailHandle,
    parser: Box<dyn LineParser>,
    prefix: Option<Arc<LinePrefix>>,
    chain: &StageChain,
    primary: mpsc::Sender<Event>,
) -> JoinHandle<Result<(), ForwarderError>> {
    let TailHandle { name, lines, task } = handle;

    let (event_tx, event_rx) = mpsc::channel(STAGE_CHANNEL_CAPACITY);
    let parse_task = tokio::spawn(async move {
        parser.process_lines(lines, event_tx, prefix.as_deref()).await;
    });
    let (mut staged, stage_tasks) = chain.attach(event_rx, STAGE_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        while let Some(event) = staged.recv().await {
            if primary.send(event).await.is_err() {
                warn!(input = %name, "sender closed before input finished");
                break;
            }
        }

        let tail_result = match task.await {
            Ok(result) => result,
            Err(e) => Err(ForwarderError::Channel(format!("tailer task failed: {e}"))),
        };
        if let Err(e) = parse_task.await {
            warn!(input = %name, error = %e, "parser task failed");
        }
        for stage in stage_tasks {
            if let Err(e) = stage.await {
                warn!(input = %name, error = %e, "stage task failed");
            }
        }
        info!(input = %name, "input finished");
        tail_result
    })
}

/// 포워더 빌더
///
/// 설정을 검증하고 입력 확장, 파서, 접두어, 스테이지를 미리 구성합니다.
pub struct ForwarderBuilder {
    config: TailpipeConfig,
    clock: Arc<dyn Clock>,
    transmission: Option<(Arc<dyn Transmission>, mpsc::Receiver<DeliveryResponse>)>,
}

impl ForwarderBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: TailpipeConfig::default(),
            clock: Arc::new(SystemClock),
            transmission: None,
        }
    }

    /// 설정을 지정합니다.
    pub fn config(mut self, config: TailpipeConfig) -> Self {
        self.config = config;
        self
    }

    /// 시간 소스를 지정합니다.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 전송기와 그 응답 수신 채널을 지정합니다.
    ///
    /// 지정하지 않으면 표준 출력 전송기를 사용합니다.
    pub fn transmission(
        mut self,
        transmission: Arc<dyn Transmission>,
        responses: mpsc::Receiver<DeliveryResponse>,
    ) -> Self {
        self.transmission = Some((transmission, responses));
        self
    }

    /// 포워더를 빌드합니다.
    pub fn build(self) -> Result<Forwarder, ForwarderError> {
        self.config.validate()?;

        let tail_options = TailOptions::from_config(&self.config.tail);
        let statefile = tail_options.statefile.clone();
        let inputs = expand_inputs(&self.config.tail.paths, statefile.as_deref())?;

        // 파일마다 새로 만들지만 이름과 옵션은 여기서 먼저 검증한다
        new_parser(&self.config.parser, Arc::clone(&self.clock))?;

        let prefix = match self.config.parser.prefix_regex.as_str() {
            "" => None,
            pattern => Some(Arc::new(LinePrefix::new(pattern)?)),
        };
        let chain = StageChain::from_config(&self.config.stages)?;

        let (transmission, responses) = match self.transmission {
            Some(pair) => pair,
            None => {
                let (stdout, responses) = StdoutTransmission::new(
                    self.config.sender.block_on_response,
                    self.config.sender.pool_size.max(1) * 2,
                );
                (Arc::new(stdout) as Arc<dyn Transmission>, responses)
            }
        };

        info!(
            inputs = ?inputs.iter().map(TailInput::name).collect::<Vec<_>>(),
            statefile = ?statefile,
            "forwarder configured"
        );

        Ok(Forwarder {
            config: self.config,
            inputs,
            tail_options,
            clock: self.clock,
            prefix,
            chain,
            transmission,
            responses,
        })
    }
}

impl Default for ForwarderBuilder {
    fn default() -> Self {
        Self::new()
    }
}
