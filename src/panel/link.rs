//! Сборка клиентской vless-ссылки из конфигурации inbound'а.

use url::Url;

use crate::core::error::{AppError, AppResult};
use crate::panel::types::{Inbound, PanelClient};

/// Собирает vless-ссылку для клиента reality-inbound'а.
///
/// Хост берется из адреса панели: клиентский трафик и админка живут на
/// одной машине. Для не-reality inbound'ов ссылка не собирается.
pub fn build_vless_link(panel_url: &str, inbound: &Inbound, client: &PanelClient) -> AppResult<String> {
    let url = Url::parse(panel_url)?;
    let host = url
        .host_str()
        .ok_or_else(|| AppError::MalformedResponse(format!("panel url '{panel_url}' has no host")))?;

    let stream = inbound.parse_stream_settings()?;
    let reality = stream
        .reality_settings
        .as_ref()
        .ok_or_else(|| AppError::MalformedResponse(format!("inbound {} has no reality settings", inbound.id)))?;

    let public_key = reality.effective_public_key().ok_or_else(|| {
        AppError::MalformedResponse(format!("inbound {} has no reality public key", inbound.id))
    })?;
    let sni = reality.server_names.first().map(String::as_str).unwrap_or(host);
    let sid = reality.short_ids.first().map(String::as_str).unwrap_or("");

    let mut link = format!(
        "vless://{}@{}:{}?type={}&security={}&pbk={}&fp=chrome&sni={}&sid={}&spx=%2F",
        client.id, host, inbound.port, stream.network, stream.security, public_key, sni, sid
    );
    if let Some(flow) = client.flow.as_deref().filter(|f| !f.is_empty()) {
        link.push_str("&flow=");
        link.push_str(flow);
    }
    link.push('#');
    link.push_str(&urlencoding::encode(&client.email));

    Ok(link)
}
