//! Lua scripts for fenced snapshot writes.
//!
//! Each script reads the room's generation and mutates the snapshot only if
//! the caller's generation is not older. Both run atomically on the Redis
//! server.
//!
//! Return codes shared by both scripts:
//! - `1`: applied
//! - `0`: fenced out (caller's generation is stale)
//! - `-1`: generation argument or stored value is not a number

/// Fenced snapshot write.
///
/// - KEYS[1]: generation key
/// - KEYS[2]: snapshot key
/// - ARGV[1]: caller's generation
/// - ARGV[2]: snapshot JSON
pub const FENCED_SAVE: &str = r#"
local expected = tonumber(ARGV[1])
if expected == nil then
    return -1
end

local stored = redis.call('GET', KEYS[1])
if stored ~= false and stored ~= nil then
    local current = tonumber(stored)
    if current == nil then
        return -1
    end
    if expected < current then
        return 0
    end
end

redis.call('SET', KEYS[1], expected)
redis.call('SET', KEYS[2], ARGV[2])
return 1
"#;

/// Fenced snapshot delete. The generation key is kept so later claims stay
/// monotonic.
///
/// - KEYS[1]: generation key
/// - KEYS[2]: snapshot key
/// - ARGV[1]: caller's generation
pub const FENCED_DELETE: &str = r#"
local expected = tonumber(ARGV[1])
if expected == nil then
    return -1
end

local stored = redis.call('GET', KEYS[1])
if stored ~= false and stored ~= nil then
    local current = tonumber(stored)
    if current == nil then
        return -1
    end
    if expected < current then
        return 0
    end
end

redis.call('DEL', KEYS[2])
return 1
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts_compare_against_stored_generation() {
        for script in [FENCED_SAVE, FENCED_DELETE] {
            assert!(script.contains("redis.call('GET', KEYS[1])"));
            assert!(script.contains("if expected < current then"));
            assert!(script.contains("return 0"));
            assert!(script.contains("return -1"));
        }
    }

    #[test]
    fn test_delete_keeps_generation_key() {
        assert!(FENCED_DELETE.contains("redis.call('DEL', KEYS[2])"));
        assert!(!FENCED_DELETE.contains("redis.call('DEL', KEYS[1])"));
    }
}
