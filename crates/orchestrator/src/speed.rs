//! 클라이언트 출력에서 최종 전송 속도(MB/s) 추출
//!
//! xrdcp 진행 표시(`[12.5MB/s]`)를 먼저 찾고, 없으면 curl 진행 표의
//! 완료 줄(첫 열이 `100`)에서 평균 다운로드 속도 열을 읽습니다.

use std::sync::LazyLock;

use regex::Regex;

static XRDCP_RATE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[(\d+(?:\.\d+)?)([kMG]B/s)\]").ok());

static CURL_RATE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^([0-9.]+)([kMG])").ok());

/// curl 진행 표 완료 줄의 최소 열 수
const CURL_MIN_COLUMNS: usize = 12;

/// curl 평균 다운로드 속도 열
const CURL_SPEED_COLUMN: usize = 6;

/// 출력에서 마지막으로 보고된 전송 속도를 MB/s 단위로 반환합니다.
pub fn extract_transfer_speed(output: &str) -> Option<f64> {
    xrdcp_speed(output).or_else(|| curl_speed(output))
}

fn to_mb_per_sec(value: f64, unit_prefix: char) -> f64 {
    match unit_prefix {
        'k' => value / 1024.0,
        'G' => value * 1024.0,
        _ => value,
    }
}

fn xrdcp_speed(output: &str) -> Option<f64> {
    let re = XRDCP_RATE.as_ref()?;
    let last = re.captures_iter(output).last()?;
    let value: f64 = last.get(1)?.as_str().parse().ok()?;
    let unit = last.get(2)?.as_str().chars().next()?;
    Some(to_mb_per_sec(value, unit))
}

fn curl_speed(output: &str) -> Option<f64> {
    let re = CURL_RATE.as_ref()?;
    output
        .lines()
        // curl은 진행 표를 \r로 덮어씀
        .flat_map(|line| line.split('\r'))
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            if columns.len() < CURL_MIN_COLUMNS || columns[0] != "100" {
                return None;
            }
            let caps = re.captures(columns[CURL_SPEED_COLUMN])?;
            let value: f64 = caps.get(1)?.as_str().parse().ok()?;
            let unit = caps.get(2)?.as_str().chars().next()?;
            Some(to_mb_per_sec(value, unit))
        })
        .last()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xrdcp_uses_last_report() {
        let out = "[0B/0B][100%][==================================================][120MB/s]\n\
                   [1.953GB/1.953GB][100%][==================================================][250.5MB/s]";
        assert_eq!(extract_transfer_speed(out), Some(250.5));
    }

    #[test]
    fn xrdcp_converts_units() {
        assert_eq!(extract_transfer_speed("[512kB/s]"), Some(0.5));
        assert_eq!(extract_transfer_speed("[2GB/s]"), Some(2048.0));
    }

    #[test]
    fn curl_completion_line() {
        let out = "  % Total    % Received % Xferd  Average Speed   Time    Time     Time  Current\n\
                   \x20                                Dload  Upload   Total   Spent    Left  Speed\n\
                   100 1024M  100 1024M    0     0   220M      0  0:00:04  0:00:04 --:--:--  221M";
        assert_eq!(extract_transfer_speed(out), Some(220.0));
    }

    #[test]
    fn curl_kilobytes() {
        let out = "100  10k  100  10k    0     0   512k      0 --:--:-- --:--:-- --:--:--  512k";
        assert_eq!(extract_transfer_speed(out), Some(0.5));
    }

    #[test]
    fn xrdcp_takes_precedence_over_curl() {
        let out = "[10MB/s]\n100 1024M  100 1024M    0     0   220M      0  0:00:04  0:00:04 --:--:--  221M";
        assert_eq!(extract_transfer_speed(out), Some(10.0));
    }

    #[test]
    fn no_speed_reported() {
        assert_eq!(extract_transfer_speed(""), None);
        assert_eq!(extract_transfer_speed("Run: [ERROR] Server responded with an error"), None);
        // 단위 없는 바이트 속도는 무시
        assert_eq!(
            extract_transfer_speed("100   512  100   512    0     0    900      0 --:--:-- --:--:-- --:--:--   900"),
            None
        );
    }
}
