use crate::model::{MediaItem, MediaKind};
use crate::page::PageElement;
use crate::selectors::DOCUMENT_EXTENSIONS;
use tracing::debug;

/// Media attached to a message, restricted to `kinds`.
///
/// Returns `None` when nothing was found. Inline `data:` images are never reported.
pub async fn extract_media(element: &PageElement, kinds: &[MediaKind]) -> Option<Vec<MediaItem>> {
    let mut items: Vec<MediaItem> = Vec::new();

    for kind in kinds {
        let found = match kind {
            MediaKind::Image => images(element).await,
            MediaKind::Video => playable(element, "video", MediaKind::Video).await,
            MediaKind::Audio => playable(element, "audio", MediaKind::Audio).await,
            MediaKind::Document => documents(element).await,
        };
        for item in found {
            if !items.iter().any(|i| i.kind == item.kind && i.url == item.url) {
                items.push(item);
            }
        }
    }

    (!items.is_empty()).then_some(items)
}

async fn images(element: &PageElement) -> Vec<MediaItem> {
    let mut items = Vec::new();
    let Ok(images) = element.locator("img[src]").all().await else {
        return items;
    };
    for image in images {
        let Ok(Some(src)) = image.non_empty_attribute("src").await else {
            continue;
        };
        if is_inline(&src) {
            debug!("Skipping inline image");
            continue;
        }
        let alt = image.non_empty_attribute("alt").await.ok().flatten();
        items.push(MediaItem {
            kind: MediaKind::Image,
            url: src,
            alt,
        });
    }
    items
}

/// `<video>` / `<audio>` elements, from their own `src` or a nested `<source>`
async fn playable(element: &PageElement, tag: &str, kind: MediaKind) -> Vec<MediaItem> {
    let mut items = Vec::new();
    let Ok(players) = element.locator(tag).all().await else {
        return items;
    };
    for player in players {
        let mut src = player.non_empty_attribute("src").await.ok().flatten();
        if src.is_none() {
            if let Ok(sources) = player.locator("source[src]").all().await {
                for source in sources {
                    if let Ok(Some(s)) = source.non_empty_attribute("src").await {
                        src = Some(s);
                        break;
                    }
                }
            }
        }
        if let Some(url) = src.filter(|s| !is_inline(s)) {
            items.push(MediaItem {
                kind,
                url,
                alt: None,
            });
        }
    }
    items
}

async fn documents(element: &PageElement) -> Vec<MediaItem> {
    let mut items = Vec::new();
    let Ok(links) = element.locator("a[href]").all().await else {
        return items;
    };
    for link in links {
        let Ok(Some(href)) = link.non_empty_attribute("href").await else {
            continue;
        };
        let Some(file_name) = document_file_name(&href) else {
            continue;
        };
        let label = link
            .text()
            .await
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        items.push(MediaItem {
            kind: MediaKind::Document,
            url: href,
            alt: Some(label.unwrap_or(file_name)),
        });
    }
    items
}

fn is_inline(src: &str) -> bool {
    src.trim_start().to_ascii_lowercase().starts_with("data:")
}

/// The last path segment of `href` when its extension is a known document type
pub fn document_file_name(href: &str) -> Option<String> {
    let path = href.split(['?', '#']).next().unwrap_or_default();
    let segment = path.trim_end_matches('/').rsplit('/').next()?;
    let (_, extension) = segment.rsplit_once('.')?;
    let extension = extension.to_ascii_lowercase();
    DOCUMENT_EXTENSIONS
        .contains(&extension.as_str())
        .then(|| segment.to_string())
}
