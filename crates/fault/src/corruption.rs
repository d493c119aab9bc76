use harness_core::fault::entity::CorruptionKind;
use rand::Rng;
use serde_json::Value;

/// 可被删除的 OHLCV 字段
pub const OHLCV_FIELDS: [&str; 5] = ["open", "high", "low", "close", "volume"];

/// # Summary
/// 从五种损坏方式中均匀随机选一种。
pub fn pick<R: Rng + ?Sized>(rng: &mut R) -> CorruptionKind {
    match rng.random_range(0..5) {
        0 => CorruptionKind::ZeroPrice,
        1 => CorruptionKind::NegativePrice,
        2 => CorruptionKind::ZeroVolume,
        3 => CorruptionKind::InvalidTimestamp,
        _ => {
            let field = OHLCV_FIELDS[rng.random_range(0..OHLCV_FIELDS.len())];
            CorruptionKind::MissingField(field.to_string())
        }
    }
}

/// # Summary
/// 对行情载荷原地施加一种损坏。
///
/// # Returns
/// 载荷确实被修改时返回 `true`；非 JSON 对象或目标字段已是损坏后的值时返回 `false`。
pub fn apply(kind: &CorruptionKind, payload: &mut Value) -> bool {
    let Some(obj) = payload.as_object_mut() else {
        return false;
    };
    let field = target_field(kind);
    let before = obj.get(field).cloned();
    match kind {
        CorruptionKind::ZeroPrice => {
            obj.insert("close".into(), Value::from(0.0));
        }
        CorruptionKind::NegativePrice => {
            let close = obj.get("close").and_then(Value::as_f64).unwrap_or(1.0);
            let negative = if close == 0.0 { -1.0 } else { -close.abs() };
            obj.insert("close".into(), Value::from(negative));
        }
        CorruptionKind::ZeroVolume => {
            obj.insert("volume".into(), Value::from(0.0));
        }
        CorruptionKind::InvalidTimestamp => {
            obj.insert("timestamp".into(), Value::from(-1));
        }
        CorruptionKind::MissingField(name) => {
            obj.remove(name);
        }
    }
    obj.get(field) != before.as_ref()
}

/// # Summary
/// 随机选一种损坏并施加，保证返回 `Some` 时载荷至少有一个字段被改变。
///
/// # Logic
/// 1. 先按 `pick` 的均匀分布选出首选方式。
/// 2. 首选方式不改变载荷时（例如成交量本来就是 0），按固定顺序尝试其余方式。
///
/// # Returns
/// 实际生效的损坏方式；没有任何方式能改变载荷时返回 `None`。
pub fn corrupt<R: Rng + ?Sized>(rng: &mut R, payload: &mut Value) -> Option<CorruptionKind> {
    let preferred = pick(rng);
    if apply(&preferred, payload) {
        return Some(preferred);
    }
    fallbacks()
        .into_iter()
        .filter(|kind| *kind != preferred)
        .find(|kind| apply(kind, payload))
}

fn fallbacks() -> Vec<CorruptionKind> {
    let mut kinds = vec![
        CorruptionKind::ZeroPrice,
        CorruptionKind::NegativePrice,
        CorruptionKind::ZeroVolume,
        CorruptionKind::InvalidTimestamp,
    ];
    kinds.extend(
        OHLCV_FIELDS
            .iter()
            .map(|field| CorruptionKind::MissingField((*field).to_string())),
    );
    kinds
}

fn target_field(kind: &CorruptionKind) -> &str {
    match kind {
        CorruptionKind::ZeroPrice | CorruptionKind::NegativePrice => "close",
        CorruptionKind::ZeroVolume => "volume",
        CorruptionKind::InvalidTimestamp => "timestamp",
        CorruptionKind::MissingField(name) => name,
    }
}
