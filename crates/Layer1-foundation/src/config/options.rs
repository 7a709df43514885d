//! Execution Options - 외부 도구 호출 옵션
//!
//! 기본값(설정 파일)과 호출별 옵션을 병합합니다.
//!
//! - 스칼라/불리언: 호출별 값이 기본값을 덮어씀
//! - 디렉토리/도구 목록: 합집합 (기본값 먼저, 중복 제거)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// 외부 도구 호출 옵션
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOptions {
    /// 모델 이름
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// 권한 모드 (default, acceptEdits, plan, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,

    /// 추가 작업 디렉토리 (합집합)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_dirs: Vec<PathBuf>,

    /// 허용 도구 (합집합)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,

    /// 금지 도구 (합집합)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disallowed_tools: Vec<String>,

    /// 시스템 프롬프트 대체
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// 시스템 프롬프트 뒤에 추가
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub append_system_prompt: Option<String>,

    /// 최대 턴 수
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,

    /// 권한 확인 생략
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dangerously_skip_permissions: Option<bool>,

    /// MCP 설정 파일
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_config: Option<PathBuf>,

    /// 프로세스 작업 디렉토리
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// 추가 환경 변수 (같은 키는 호출별 값 우선)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// 그대로 붙이는 인자 (호출별 값이 있으면 대체)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
}

impl ExecutionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 기본값(self)과 호출별 옵션을 병합한 새 옵션
    pub fn merged_with(&self, overrides: &ExecutionOptions) -> ExecutionOptions {
        let mut env = self.env.clone();
        env.extend(overrides.env.clone());

        ExecutionOptions {
            model: overrides.model.clone().or_else(|| self.model.clone()),
            permission_mode: overrides
                .permission_mode
                .clone()
                .or_else(|| self.permission_mode.clone()),
            add_dirs: union(&self.add_dirs, &overrides.add_dirs),
            allowed_tools: union(&self.allowed_tools, &overrides.allowed_tools),
            disallowed_tools: union(&self.disallowed_tools, &overrides.disallowed_tools),
            system_prompt: overrides
                .system_prompt
                .clone()
                .or_else(|| self.system_prompt.clone()),
            append_system_prompt: overrides
                .append_system_prompt
                .clone()
                .or_else(|| self.append_system_prompt.clone()),
            max_turns: overrides.max_turns.or(self.max_turns),
            dangerously_skip_permissions: overrides
                .dangerously_skip_permissions
                .or(self.dangerously_skip_permissions),
            mcp_config: overrides
                .mcp_config
                .clone()
                .or_else(|| self.mcp_config.clone()),
            working_dir: overrides
                .working_dir
                .clone()
                .or_else(|| self.working_dir.clone()),
            env,
            extra_args: if overrides.extra_args.is_empty() {
                self.extra_args.clone()
            } else {
                overrides.extra_args.clone()
            },
        }
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn permission_mode(mut self, mode: impl Into<String>) -> Self {
        self.permission_mode = Some(mode.into());
        self
    }

    pub fn add_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.add_dirs.push(dir.into());
        self
    }

    pub fn allow_tool(mut self, tool: impl Into<String>) -> Self {
        self.allowed_tools.push(tool.into());
        self
    }

    pub fn disallow_tool(mut self, tool: impl Into<String>) -> Self {
        self.disallowed_tools.push(tool.into());
        self
    }

    pub fn max_turns(mut self, turns: u32) -> Self {
        self.max_turns = Some(turns);
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// 순서를 유지하는 합집합
fn union<T: Clone + PartialEq>(base: &[T], extra: &[T]) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(base.len() + extra.len());
    for item in base.iter().chain(extra.iter()) {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_override_wins() {
        let defaults = ExecutionOptions::new().model("sonnet").max_turns(10);
        let call = ExecutionOptions::new().model("opus");

        let merged = defaults.merged_with(&call);
        assert_eq!(merged.model.as_deref(), Some("opus"));
        assert_eq!(merged.max_turns, Some(10));
    }

    #[test]
    fn test_dirs_are_unioned() {
        let defaults = ExecutionOptions::new().add_dir("/repo").add_dir("/shared");
        let call = ExecutionOptions::new().add_dir("/shared").add_dir("/extra");

        let merged = defaults.merged_with(&call);
        assert_eq!(
            merged.add_dirs,
            vec![
                PathBuf::from("/repo"),
                PathBuf::from("/shared"),
                PathBuf::from("/extra")
            ]
        );
    }

    #[test]
    fn test_env_and_extra_args() {
        let mut defaults = ExecutionOptions::new().env("A", "1").env("B", "1");
        defaults.extra_args = vec!["--debug".to_string()];
        let call = ExecutionOptions::new().env("B", "2");

        let merged = defaults.merged_with(&call);
        assert_eq!(merged.env.get("A").map(String::as_str), Some("1"));
        assert_eq!(merged.env.get("B").map(String::as_str), Some("2"));
        assert_eq!(merged.extra_args, vec!["--debug".to_string()]);
    }

    #[test]
    fn test_serde_camel_case() {
        let json = r#"{"permissionMode":"plan","addDirs":["/a"],"maxTurns":3}"#;
        let options: ExecutionOptions = serde_json::from_str(json).unwrap();
        assert_eq!(options.permission_mode.as_deref(), Some("plan"));
        assert_eq!(options.add_dirs, vec![PathBuf::from("/a")]);
        assert_eq!(options.max_turns, Some(3));
    }
}
