//! 파이프라인 trait -- 외부 협력자(파서, 전송기) 확장 포인트 정의

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::config::ParserConfig;
use crate::error::TailpipeError;
use crate::event::Event;
use crate::prefix::LinePrefix;

/// trait 객체에서 사용하는 boxed future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 라인 파서 trait
///
/// 새로운 로그 형식을 지원하려면 이 trait을 구현합니다.
/// 파일마다 독립된 인스턴스가 생성됩니다.
pub trait LineParser: Send + Sync {
    /// 지원하는 로그 형식 이름
    fn format_name(&self) -> &str;

    /// 파서 옵션을 적용합니다. 실패는 시작 전 설정 에러로 취급됩니다.
    fn init(&mut self, config: &ParserConfig) -> Result<(), TailpipeError>;

    /// `lines`가 닫힐 때까지 라인을 읽어 이벤트를 `send`로 보냅니다.
    ///
    /// `prefix`가 주어지면 각 라인에서 접두어를 먼저 떼어내고,
    /// 이름 있는 그룹을 이벤트 데이터에 병합해야 합니다.
    /// 파싱할 수 없는 라인은 로그를 남기고 건너뜁니다.
    fn process_lines<'a>(
        &'a self,
        lines: mpsc::Receiver<String>,
        send: mpsc::Sender<Event>,
        prefix: Option<&'a LinePrefix>,
    ) -> BoxFuture<'a, ()>;
}

/// 전송 협력자 trait
///
/// 이벤트를 비동기로 전달하고, 결과는 생성 시 함께 반환한
/// `DeliveryResponse` 수신 채널로 돌려줍니다.
pub trait Transmission: Send + Sync {
    /// 이미 샘플링이 결정된 이벤트를 전송 큐에 넣습니다.
    ///
    /// 내부 큐가 가득 차면 자리가 날 때까지 대기합니다 (block-on-send).
    fn send_presampled(&self, event: Event) -> BoxFuture<'_, Result<(), TailpipeError>>;

    /// 남은 이벤트를 모두 내보내고 응답 채널을 닫습니다.
    fn close(&self) -> BoxFuture<'_, ()>;
}
