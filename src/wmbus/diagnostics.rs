//! # Windowed RF Diagnostics
//!
//! The dispatcher aggregates every dequeued packet into a
//! [`DiagnosticsWindow`]: totals, per-drop-reason buckets, per-link-mode
//! counters, RSSI sums and T1 symbol statistics. The window is rendered into
//! a JSON summary (with a triage hint) on a fixed cadence and then zeroed.
//!
//! All arithmetic is integer: percentages are `x * 100 / n` (0 when `n` is
//! 0) and averages truncate toward zero. Dashboards bucket on the summary
//! field names and hint codes, so both are stable.

use serde_json::{json, Value};

use crate::wmbus::link_mode::LinkMode;
use crate::wmbus::threeofsix::DecodeStats;

/// Average drop RSSI at or below this is "very weak" (C1 rule).
pub const VERY_WEAK_RSSI_DBM: i32 = -95;
/// Average drop RSSI at or below this is "weak" (overall rule).
pub const WEAK_RSSI_DBM: i32 = -92;
/// Average ok RSSI at or above this counts as strong reception.
pub const STRONG_OK_RSSI_DBM: i32 = -65;
/// Average drop RSSI at or above this means drops are not weak-signal.
pub const STRONG_DROP_RSSI_DBM: i32 = -80;

/// Integer percentage, 0 when the denominator is 0.
pub fn pct(part: u32, total: u32) -> u32 {
    if total == 0 {
        0
    } else {
        part * 100 / total
    }
}

fn avg(sum: i32, count: u32) -> i32 {
    if count == 0 {
        0
    } else {
        sum / count as i32
    }
}

/// Drop-reason buckets with stable positions. Unmapped reasons land in
/// `Other`; `truncated` packets are counted orthogonally to drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropBucket {
    TooShort,
    DecodeFailed,
    DllCrcFailed,
    UnknownPreamble,
    LFieldInvalid,
    UnknownLinkMode,
    Other,
}

impl DropBucket {
    pub const COUNT: usize = 7;

    /// Map a drop-reason tag to its bucket.
    pub fn from_reason(reason: &str) -> Self {
        match reason {
            "too_short" => DropBucket::TooShort,
            "decode_failed" => DropBucket::DecodeFailed,
            // Older builds reported dll_crc_strip_failed.
            "dll_crc_failed" | "dll_crc_strip_failed" => DropBucket::DllCrcFailed,
            "unknown_preamble" => DropBucket::UnknownPreamble,
            "l_field_invalid" => DropBucket::LFieldInvalid,
            "unknown_link_mode" => DropBucket::UnknownLinkMode,
            _ => DropBucket::Other,
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

#[derive(Debug, Default)]
struct ModeWindow {
    total: u32,
    ok: u32,
    dropped: u32,
    crc_failed: u32,
    rssi_ok_sum: i32,
    rssi_ok_n: u32,
    rssi_drop_sum: i32,
    rssi_drop_n: u32,
}

/// Counters for one summary window; reset after each published summary.
#[derive(Debug, Default)]
pub struct DiagnosticsWindow {
    total: u32,
    ok: u32,
    truncated: u32,
    dropped: u32,
    rssi_ok_sum: i32,
    rssi_ok_n: u32,
    rssi_drop_sum: i32,
    rssi_drop_n: u32,
    modes: [ModeWindow; 3],
    dropped_by_bucket: [u32; DropBucket::COUNT],
    t1_symbols_total: u32,
    t1_symbols_invalid: u32,
}

impl DiagnosticsWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every dequeued packet is a received attempt.
    pub fn record_attempt(&mut self, mode: LinkMode) {
        self.total += 1;
        self.modes[mode.index()].total += 1;
    }

    pub fn record_t1_symbols(&mut self, stats: DecodeStats) {
        self.t1_symbols_total += stats.symbols_total as u32;
        self.t1_symbols_invalid += stats.symbols_invalid as u32;
    }

    pub fn record_ok(&mut self, mode: LinkMode, rssi: i8) {
        self.ok += 1;
        self.rssi_ok_sum += rssi as i32;
        self.rssi_ok_n += 1;
        let m = &mut self.modes[mode.index()];
        m.ok += 1;
        m.rssi_ok_sum += rssi as i32;
        m.rssi_ok_n += 1;
    }

    pub fn record_truncated(&mut self) {
        self.truncated += 1;
    }

    /// Record a dropped packet and return the bucket it landed in.
    pub fn record_drop(&mut self, mode: LinkMode, rssi: i8, reason: &str) -> DropBucket {
        self.dropped += 1;
        self.rssi_drop_sum += rssi as i32;
        self.rssi_drop_n += 1;
        let m = &mut self.modes[mode.index()];
        m.dropped += 1;
        m.rssi_drop_sum += rssi as i32;
        m.rssi_drop_n += 1;

        let bucket = DropBucket::from_reason(reason);
        self.dropped_by_bucket[bucket.index()] += 1;
        if bucket == DropBucket::DllCrcFailed {
            self.modes[mode.index()].crc_failed += 1;
        }
        bucket
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn ok(&self) -> u32 {
        self.ok
    }

    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn truncated(&self) -> u32 {
        self.truncated
    }

    pub fn bucket_count(&self, bucket: DropBucket) -> u32 {
        self.dropped_by_bucket[bucket.index()]
    }

    /// Zero every counter (start of a fresh window).
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Extract the derived integers the triage rules and summary use.
    pub fn features(&self) -> WindowFeatures {
        let t1 = &self.modes[LinkMode::T1.index()];
        let c1 = &self.modes[LinkMode::C1.index()];
        let crc_failed = self.dropped_by_bucket[DropBucket::DllCrcFailed.index()];
        let reasons_sum: u32 = self.dropped_by_bucket.iter().sum();

        WindowFeatures {
            total: self.total,
            ok: self.ok,
            truncated: self.truncated,
            dropped: self.dropped,
            crc_failed,
            crc_fail_pct: pct(crc_failed, self.total),
            drop_pct: pct(self.dropped, self.total),
            trunc_pct: pct(self.truncated, self.total),
            avg_ok_rssi: avg(self.rssi_ok_sum, self.rssi_ok_n),
            avg_drop_rssi: avg(self.rssi_drop_sum, self.rssi_drop_n),
            t1: ModeFeatures::from_window(t1),
            c1: ModeFeatures::from_window(c1),
            t1_sym_total: self.t1_symbols_total,
            t1_sym_invalid: self.t1_symbols_invalid,
            t1_sym_invalid_pct: pct(self.t1_symbols_invalid, self.t1_symbols_total),
            reasons_sum,
            reasons_sum_mismatch: reasons_sum != self.dropped,
        }
    }

    /// First-match triage hint for the current window.
    pub fn hint(&self) -> TriageHint {
        self.features().hint()
    }

    /// Render the `summary` event payload.
    pub fn summary_payload(&self) -> Value {
        let f = self.features();
        let hint = f.hint();
        json!({
            "event": "summary",
            "total": f.total,
            "ok": f.ok,
            "truncated": f.truncated,
            "dropped": f.dropped,
            "crc_failed": f.crc_failed,
            "crc_fail_pct": f.crc_fail_pct,
            "drop_pct": f.drop_pct,
            "trunc_pct": f.trunc_pct,
            "avg_ok_rssi": f.avg_ok_rssi,
            "avg_drop_rssi": f.avg_drop_rssi,
            "t1": {
                "total": f.t1.total,
                "ok": f.t1.ok,
                "dropped": f.t1.dropped,
                "per_pct": f.t1.drop_pct,
                "crc_failed": f.t1.crc_failed,
                "crc_pct": f.t1.crc_pct,
                "avg_ok_rssi": f.t1.avg_ok_rssi,
                "avg_drop_rssi": f.t1.avg_drop_rssi,
                "sym_total": f.t1_sym_total,
                "sym_invalid": f.t1_sym_invalid,
                "sym_invalid_pct": f.t1_sym_invalid_pct,
            },
            "c1": {
                "total": f.c1.total,
                "ok": f.c1.ok,
                "dropped": f.c1.dropped,
                "per_pct": f.c1.drop_pct,
                "crc_failed": f.c1.crc_failed,
                "crc_pct": f.c1.crc_pct,
                "avg_ok_rssi": f.c1.avg_ok_rssi,
                "avg_drop_rssi": f.c1.avg_drop_rssi,
            },
            "dropped_by_reason": {
                "too_short": self.bucket_count(DropBucket::TooShort),
                "decode_failed": self.bucket_count(DropBucket::DecodeFailed),
                "dll_crc_failed": self.bucket_count(DropBucket::DllCrcFailed),
                "unknown_preamble": self.bucket_count(DropBucket::UnknownPreamble),
                "l_field_invalid": self.bucket_count(DropBucket::LFieldInvalid),
                "unknown_link_mode": self.bucket_count(DropBucket::UnknownLinkMode),
                "other": self.bucket_count(DropBucket::Other),
            },
            "reasons_sum": f.reasons_sum,
            "reasons_sum_mismatch": u8::from(f.reasons_sum_mismatch),
            "hint_code": hint.code,
            "hint_en": hint.en,
            "hint_pl": hint.pl,
        })
    }
}

/// Derived per-mode integers.
#[derive(Debug, Clone, Copy)]
pub struct ModeFeatures {
    pub total: u32,
    pub ok: u32,
    pub dropped: u32,
    pub crc_failed: u32,
    pub drop_pct: u32,
    pub crc_pct: u32,
    pub avg_ok_rssi: i32,
    pub avg_drop_rssi: i32,
}

impl ModeFeatures {
    fn from_window(window: &ModeWindow) -> Self {
        Self {
            total: window.total,
            ok: window.ok,
            dropped: window.dropped,
            crc_failed: window.crc_failed,
            drop_pct: pct(window.dropped, window.total),
            crc_pct: pct(window.crc_failed, window.total),
            avg_ok_rssi: avg(window.rssi_ok_sum, window.rssi_ok_n),
            avg_drop_rssi: avg(window.rssi_drop_sum, window.rssi_drop_n),
        }
    }
}

/// Window-derived integers feeding the triage rule chain.
#[derive(Debug, Clone, Copy)]
pub struct WindowFeatures {
    pub total: u32,
    pub ok: u32,
    pub truncated: u32,
    pub dropped: u32,
    pub crc_failed: u32,
    pub crc_fail_pct: u32,
    pub drop_pct: u32,
    pub trunc_pct: u32,
    pub avg_ok_rssi: i32,
    pub avg_drop_rssi: i32,
    pub t1: ModeFeatures,
    pub c1: ModeFeatures,
    pub t1_sym_total: u32,
    pub t1_sym_invalid: u32,
    pub t1_sym_invalid_pct: u32,
    pub reasons_sum: u32,
    pub reasons_sum_mismatch: bool,
}

impl WindowFeatures {
    /// Evaluate the triage rules in order; first hit wins. New rules must be
    /// appended, never re-ordered: dashboards key off the codes.
    pub fn hint(&self) -> TriageHint {
        if self.total == 0 {
            return TriageHint {
                code: "NO_DATA",
                en: "no packets received yet",
                pl: "brak odebranych ramek",
            };
        }
        if self.c1.total > 0 && self.c1.ok == 0 && self.c1.crc_failed == self.c1.total {
            if self.c1.avg_drop_rssi <= VERY_WEAK_RSSI_DBM {
                return TriageHint {
                    code: "C1_WEAK_SIGNAL",
                    en: "C1 frames fail DLL CRC at very low RSSI; improve antenna/placement",
                    pl: "C1: CRC DLL nie przechodzi przy bardzo niskim RSSI; popraw antenę/pozycję",
                };
            }
            return TriageHint {
                code: "C1_INTERFERENCE_OR_RX",
                en: "C1 frames fail DLL CRC despite decent RSSI; check interference/RX settings",
                pl: "C1: CRC DLL nie przechodzi mimo niezłego RSSI; sprawdź zakłócenia/ustawienia RX",
            };
        }
        if self.c1.total > 0
            && self.c1.crc_failed > 0
            && self.c1.avg_ok_rssi >= STRONG_OK_RSSI_DBM
            && self.c1.avg_drop_rssi >= STRONG_DROP_RSSI_DBM
        {
            return TriageHint {
                code: "C1_OVERLOAD_OR_MULTIPATH",
                en: "C1 CRC fails despite strong RSSI; possible receiver overload or multipath. \
                     Move antenna 0.5-2m, change polarization, or attenuate.",
                pl: "C1: CRC pada mimo dobrego RSSI; możliwy przester odbiornika lub \
                     wielodrogowość. Odsuń antenę 0,5-2m, zmień polaryzację lub stłum sygnał.",
            };
        }
        if self.t1.total > 0
            && self.t1.crc_failed > 0
            && self.t1.avg_ok_rssi >= STRONG_OK_RSSI_DBM
            && self.t1.avg_drop_rssi >= STRONG_DROP_RSSI_DBM
        {
            return TriageHint {
                code: "T1_OVERLOAD_OR_MULTIPATH",
                en: "T1 CRC fails despite strong RSSI; possible receiver overload or multipath. \
                     Move/rotate antenna or attenuate.",
                pl: "T1: CRC pada mimo dobrego RSSI; możliwy przester lub wielodrogowość. \
                     Przestaw/obróć antenę lub stłum sygnał.",
            };
        }
        if self.drop_pct >= 60 && self.avg_drop_rssi <= WEAK_RSSI_DBM {
            return TriageHint {
                code: "WEAK_SIGNAL",
                en: "many drops at very low RSSI; improve antenna/placement",
                pl: "dużo dropów przy bardzo niskim RSSI; popraw antenę/pozycję",
            };
        }
        if self.t1.total > 0 && self.t1_sym_total >= 200 && self.t1_sym_invalid_pct >= 5 {
            return TriageHint {
                code: "T1_SYMBOL_ERRORS",
                en: "T1 has many invalid 3-of-6 symbols; likely bit errors/interference",
                pl: "T1: dużo błędnych symboli 3-of-6; możliwe błędy bitów/zakłócenia",
            };
        }
        if self.t1.total > 0 && self.t1.crc_pct >= 10 && self.t1_sym_invalid_pct < 2 {
            return TriageHint {
                code: "T1_BITFLIPS",
                en: "T1 mostly decodes but often fails DLL CRC; likely occasional bitflips",
                pl: "T1: dekoduje się, ale często pada CRC DLL; możliwe sporadyczne bitflipy",
            };
        }
        if self.ok > 0 && self.drop_pct <= 10 {
            return TriageHint {
                code: "GOOD",
                en: "RF link looks stable",
                pl: "łącze radiowe wygląda stabilnie",
            };
        }
        TriageHint {
            code: "OK",
            en: "looks good",
            pl: "wygląda dobrze",
        }
    }
}

/// Advisory triage code with operator-facing texts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriageHint {
    pub code: &'static str,
    pub en: &'static str,
    pub pl: &'static str,
}
