//! 시나리오 루트 경로 치환
//!
//! 값이 [`ROOT_PATH_TOKEN`]으로 시작할 때만 그 접두어를 한 번 치환합니다.
//! 토큰이 중간에 있거나 없는 값은 바이트 단위로 그대로 통과합니다.

/// 시나리오 파일에서 루트 경로를 가리키는 토큰
pub const ROOT_PATH_TOKEN: &str = "TEST_PATH";

/// 접두어 토큰을 `root`로 치환합니다.
pub fn substitute_root(value: &str, root: &str) -> String {
    match value.strip_prefix(ROOT_PATH_TOKEN) {
        Some(rest) => format!("{root}{rest}"),
        None => value.to_owned(),
    }
}
