//! 실행별 정리 대상 컨테이너 목록
//!
//! 컨테이너는 create가 성공한 직후 등록됩니다. start나 준비 상태 확인이
//! 실패해도 이미 등록되어 있으므로 정리 단계에서 빠지지 않습니다.

use std::collections::BTreeMap;

use serde::Serialize;
use xrdtest_core::ConnectionEndpoint;

/// 정리 대상 컨테이너 하나
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedContainer {
    /// 역할 레이블 (`server[0]@xrd1`, `test-client`)
    pub role: String,
    pub name: String,
    pub id: String,
    pub endpoint: ConnectionEndpoint,
    pub is_client: bool,
}

/// 실행 하나가 만든 컨테이너 목록 (생성 순서 유지)
#[derive(Debug, Default)]
pub struct TeardownSet {
    containers: Vec<TrackedContainer>,
}

impl TeardownSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, container: TrackedContainer) {
        tracing::debug!(
            role = %container.role,
            container = %container.name,
            endpoint = %container.endpoint,
            "registered for teardown"
        );
        self.containers.push(container);
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.containers.iter().any(|c| c.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedContainer> {
        self.containers.iter()
    }

    /// 서버 역할 컨테이너 (생성 순서)
    pub fn servers(&self) -> impl Iterator<Item = &TrackedContainer> {
        self.containers.iter().filter(|c| !c.is_client)
    }

    /// 엔드포인트별로 묶습니다. 그룹 안에서는 생성의 역순입니다.
    pub fn into_groups(self) -> BTreeMap<ConnectionEndpoint, Vec<TrackedContainer>> {
        let mut groups: BTreeMap<ConnectionEndpoint, Vec<TrackedContainer>> = BTreeMap::new();
        for container in self.containers.into_iter().rev() {
            groups
                .entry(container.endpoint.clone())
                .or_default()
                .push(container);
        }
        groups
    }
}
