use serde_json::Value;

use crate::config::ChunkingSettings;

/// Chunking parameters for a job: `chunkSize` and `chunkOverlap` in the job
/// config override the service defaults.
pub fn settings_for_job(
    config: Option<&Value>,
    defaults: ChunkingSettings,
) -> Result<ChunkingSettings, String> {
    let Some(config) = config.filter(|c| !c.is_null()) else {
        return Ok(defaults);
    };
    let Some(map) = config.as_object() else {
        return Err("Job config must be a JSON object".to_string());
    };

    let read = |key: &str, fallback: usize| -> Result<usize, String> {
        match map.get(key) {
            None | Some(Value::Null) => Ok(fallback),
            Some(v) => v
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| format!("{key} must be a non-negative integer")),
        }
    };

    let settings = ChunkingSettings {
        chunk_size: read("chunkSize", defaults.chunk_size)?,
        chunk_overlap: read("chunkOverlap", defaults.chunk_overlap)?,
    };
    if settings.chunk_size == 0 {
        return Err("chunkSize must be positive".to_string());
    }
    if settings.chunk_overlap >= settings.chunk_size {
        return Err("chunkOverlap must be smaller than chunkSize".to_string());
    }
    Ok(settings)
}

/// Splits text into windows of at most `chunk_size` characters, each starting
/// `chunk_overlap` characters before the previous one ended. Windows end on
/// whitespace when there is any past the overlap region.
pub fn chunk_text(text: &str, settings: ChunkingSettings) -> Vec<String> {
    let ChunkingSettings {
        chunk_size,
        chunk_overlap,
    } = settings;
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    if chunk_size == 0 || chunk_overlap >= chunk_size {
        return chunks;
    }

    let mut start = 0;
    while start < chars.len() {
        let mut end = (start + chunk_size).min(chars.len());
        if end < chars.len() {
            // Keep every break past the overlap so the next window still advances.
            let floor = start + chunk_overlap + 1;
            if let Some(ws) = (floor..end).rev().find(|&i| chars[i].is_whitespace()) {
                end = ws;
            }
        }

        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }

        if end >= chars.len() {
            break;
        }
        start = end - chunk_overlap;
    }
    chunks
}
