//! Static provider catalogue: canonical ids, wire dialects, auth schemes,
//! ordered base URLs and OAuth refresh endpoints.

use promux_protocol::WireFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <secret>`
    Bearer,
    /// `x-api-key: <secret>` (plus `anthropic-version`)
    XApiKey,
    /// `?key=<secret>` query parameter
    QueryKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthEncoding {
    Form,
    Json,
}

#[derive(Debug, Clone, Copy)]
pub struct OAuthSpec {
    pub token_url: &'static str,
    /// Empty means the client id lives in `providerSpecificData.clientId`.
    pub client_id: &'static str,
    pub client_secret: Option<&'static str>,
    pub encoding: OAuthEncoding,
}

#[derive(Debug, Clone, Copy)]
pub struct ProviderSpec {
    pub id: &'static str,
    pub aliases: &'static [&'static str],
    pub wire: WireFormat,
    pub auth: AuthScheme,
    /// Tried in order; a per-connection `baseUrl` override goes first.
    pub base_urls: &'static [&'static str],
    pub chat_path: &'static str,
    pub models_path: &'static str,
    /// Rate limits enforced per model family rather than per account.
    pub multi_bucket: bool,
    pub oauth: Option<OAuthSpec>,
}

impl ProviderSpec {
    /// Canonical id plus aliases, for matching connection documents.
    pub fn ids(&self) -> Vec<&'static str> {
        let mut out = vec![self.id];
        out.extend_from_slice(self.aliases);
        out
    }
}

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

macro_rules! openai_compat {
    ($id:literal, $base:literal) => {
        ProviderSpec {
            id: $id,
            aliases: &[],
            wire: WireFormat::OpenAI,
            auth: AuthScheme::Bearer,
            base_urls: &[$base],
            chat_path: "/chat/completions",
            models_path: "/models",
            multi_bucket: false,
            oauth: None,
        }
    };
}

static CATALOGUE: &[ProviderSpec] = &[
    openai_compat!("openai", "https://api.openai.com/v1"),
    ProviderSpec {
        id: "anthropic",
        aliases: &["claude"],
        wire: WireFormat::Claude,
        auth: AuthScheme::XApiKey,
        base_urls: &["https://api.anthropic.com/v1"],
        chat_path: "/messages",
        models_path: "/models",
        multi_bucket: false,
        oauth: Some(OAuthSpec {
            token_url: "https://console.anthropic.com/v1/oauth/token",
            client_id: "9d1c250a-e61b-44d9-88ed-5944d1962f5e",
            client_secret: None,
            encoding: OAuthEncoding::Json,
        }),
    },
    ProviderSpec {
        id: "gemini",
        aliases: &[],
        wire: WireFormat::Gemini,
        auth: AuthScheme::QueryKey,
        base_urls: &["https://generativelanguage.googleapis.com/v1beta"],
        chat_path: "",
        models_path: "/models",
        multi_bucket: false,
        oauth: None,
    },
    ProviderSpec {
        id: "gemini-cli",
        aliases: &[],
        wire: WireFormat::Gemini,
        auth: AuthScheme::Bearer,
        base_urls: &["https://generativelanguage.googleapis.com/v1beta"],
        chat_path: "",
        models_path: "/models",
        multi_bucket: false,
        oauth: Some(OAuthSpec {
            token_url: GOOGLE_TOKEN_URL,
            client_id: "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com",
            client_secret: Some("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"),
            encoding: OAuthEncoding::Form,
        }),
    },
    ProviderSpec {
        id: "antigravity",
        aliases: &[],
        wire: WireFormat::Antigravity,
        auth: AuthScheme::Bearer,
        base_urls: &[
            "https://daily-cloudcode-pa.sandbox.googleapis.com/v1internal",
            "https://cloudcode-pa.googleapis.com/v1internal",
        ],
        chat_path: "",
        models_path: ":models",
        multi_bucket: true,
        oauth: Some(OAuthSpec {
            token_url: GOOGLE_TOKEN_URL,
            client_id: "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com",
            client_secret: Some("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"),
            encoding: OAuthEncoding::Form,
        }),
    },
    ProviderSpec {
        id: "kiro",
        aliases: &["codewhisperer"],
        wire: WireFormat::Kiro,
        auth: AuthScheme::Bearer,
        base_urls: &["https://codewhisperer.us-east-1.amazonaws.com"],
        chat_path: "/generateAssistantResponse",
        models_path: "",
        multi_bucket: false,
        oauth: Some(OAuthSpec {
            token_url: "https://oidc.us-east-1.amazonaws.com/token",
            client_id: "",
            client_secret: None,
            encoding: OAuthEncoding::Json,
        }),
    },
    ProviderSpec {
        id: "qwen",
        aliases: &[],
        wire: WireFormat::OpenAI,
        auth: AuthScheme::Bearer,
        base_urls: &["https://portal.qwen.ai/v1"],
        chat_path: "/chat/completions",
        models_path: "/models",
        multi_bucket: false,
        oauth: Some(OAuthSpec {
            token_url: "https://chat.qwen.ai/api/v1/oauth2/token",
            client_id: "f0304373b74a44d2b584a3fb70ca9e56",
            client_secret: None,
            encoding: OAuthEncoding::Form,
        }),
    },
    openai_compat!("deepseek", "https://api.deepseek.com/v1"),
    openai_compat!("groq", "https://api.groq.com/openai/v1"),
    openai_compat!("xai", "https://api.x.ai/v1"),
    openai_compat!("mistral", "https://api.mistral.ai/v1"),
    openai_compat!("perplexity", "https://api.perplexity.ai"),
    openai_compat!("together", "https://api.together.xyz/v1"),
    openai_compat!("fireworks", "https://api.fireworks.ai/inference/v1"),
    openai_compat!("cerebras", "https://api.cerebras.ai/v1"),
    openai_compat!("cohere", "https://api.cohere.ai/compatibility/v1"),
    openai_compat!("nebius", "https://api.studio.nebius.ai/v1"),
    openai_compat!("siliconflow", "https://api.siliconflow.cn/v1"),
    openai_compat!("hyperbolic", "https://api.hyperbolic.xyz/v1"),
    openai_compat!("chutes", "https://llm.chutes.ai/v1"),
    openai_compat!("nvidia", "https://integrate.api.nvidia.com/v1"),
    openai_compat!("openrouter", "https://openrouter.ai/api/v1"),
];

pub fn all() -> &'static [ProviderSpec] {
    CATALOGUE
}

pub fn find(id_or_alias: &str) -> Option<&'static ProviderSpec> {
    CATALOGUE
        .iter()
        .find(|spec| spec.id == id_or_alias || spec.aliases.contains(&id_or_alias))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_to_canonical() {
        assert_eq!(find("claude").unwrap().id, "anthropic");
        assert_eq!(find("codewhisperer").unwrap().id, "kiro");
        assert!(find("unknown-vendor").is_none());
    }

    #[test]
    fn only_antigravity_is_multi_bucket() {
        let multi: Vec<&str> = all()
            .iter()
            .filter(|s| s.multi_bucket)
            .map(|s| s.id)
            .collect();
        assert_eq!(multi, ["antigravity"]);
    }

    #[test]
    fn openai_compat_vendors_share_wire_and_auth() {
        for id in ["deepseek", "groq", "openrouter", "nvidia"] {
            let spec = find(id).unwrap();
            assert_eq!(spec.wire, promux_protocol::WireFormat::OpenAI);
            assert_eq!(spec.auth, AuthScheme::Bearer);
            assert_eq!(spec.chat_path, "/chat/completions");
        }
    }
}
