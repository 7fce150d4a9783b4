// DP-LEARNER: TSC FAST CLOCK
// Replaces clock_gettime(MONOTONIC) in the hot loop with raw rdtsc.
// Calibrated at boot against CLOCK_MONOTONIC. Fixed-point multiply+shift
// conversion, the same method the Linux kernel uses (arch/x86/kernel/tsc.c).
// The drain scheduler and the IPv4 identifier seed both read this clock.

use std::time::Duration;

// ============================================================================
// MONOTONIC CLOCK (KERNEL FALLBACK)
// ============================================================================

#[inline(always)]
pub fn clock_ns() -> u64 {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

// ============================================================================
// TSC CALIBRATION
// ============================================================================

/// TSC-to-nanosecond calibration data. Computed once at boot, immutable after.
/// Conversion: ns = mono_base + ((rdtsc() - tsc_base) * mult) >> shift
#[derive(Clone, Copy)]
pub struct TscCal {
    tsc_base: u64,
    mono_base: u64,
    mult: u32,
    shift: u32,
    valid: bool,
}

impl TscCal {
    /// Fallback calibration: rdtsc_ns() will call clock_ns() instead.
    pub fn fallback() -> Self {
        TscCal { tsc_base: 0, mono_base: 0, mult: 0, shift: 0, valid: false }
    }
}

// ============================================================================
// RAW TSC READ (ARCHITECTURE-SPECIFIC)
// ============================================================================

/// Raw TSC read. No serialization (lfence/rdtscp); out-of-order error is a
/// couple of ns, irrelevant against a 100ns drain budget.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn read_tsc() -> u64 {
    let lo: u32;
    let hi: u32;
    unsafe {
        core::arch::asm!(
            "rdtsc",
            out("eax") lo,
            out("edx") hi,
            options(nostack, nomem, preserves_flags)
        );
    }
    ((hi as u64) << 32) | (lo as u64)
}

/// ARM equivalent: CNTVCT_EL0 (generic timer virtual count).
#[cfg(target_arch = "aarch64")]
#[inline(always)]
pub fn read_tsc() -> u64 {
    let cnt: u64;
    unsafe {
        core::arch::asm!(
            "mrs {cnt}, CNTVCT_EL0",
            cnt = out(reg) cnt,
            options(nostack, nomem, preserves_flags)
        );
    }
    cnt
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline(always)]
pub fn read_tsc() -> u64 {
    clock_ns()
}

// ============================================================================
// TSC -> NANOSECOND CONVERSION (HOT PATH)
// ============================================================================

#[inline(always)]
pub fn rdtsc_ns(cal: &TscCal) -> u64 {
    if !cal.valid {
        return clock_ns();
    }
    let delta = read_tsc().wrapping_sub(cal.tsc_base);
    cal.mono_base
        .wrapping_add(((delta as u128 * cal.mult as u128) >> cal.shift) as u64)
}

// ============================================================================
// CALIBRATION ROUTINE (COLD PATH, CALLED ONCE AT BOOT)
// ============================================================================

/// Two-point TSC calibration against CLOCK_MONOTONIC over 100ms, validated
/// over 1000 samples afterwards. Returns the clock_gettime fallback if the
/// TSC is unreliable.
pub fn calibrate_tsc() -> TscCal {
    for _ in 0..100 {
        let _ = read_tsc();
        let _ = clock_ns();
    }

    let tsc0 = read_tsc();
    let mono0 = clock_ns();
    std::thread::sleep(Duration::from_millis(100));
    let tsc1 = read_tsc();
    let mono1 = clock_ns();

    let tsc_delta = tsc1.wrapping_sub(tsc0);
    let mono_delta = mono1.saturating_sub(mono0);

    if tsc_delta == 0 || mono_delta == 0 {
        tracing::warn!("TSC calibration failed (zero delta), using clock_gettime fallback");
        return TscCal::fallback();
    }

    let shift: u32 = 32;
    let mult = ((mono_delta as u128) << shift) / (tsc_delta as u128);
    if mult > u32::MAX as u128 {
        tracing::warn!("TSC frequency too low for u32 mult, using clock_gettime fallback");
        return TscCal::fallback();
    }
    let mult = mult as u32;

    let tsc_base = read_tsc();
    let mono_base = clock_ns();
    let cal = TscCal { tsc_base, mono_base, mult, shift, valid: true };

    let mut max_error: i64 = 0;
    for _ in 0..1000 {
        let err = (rdtsc_ns(&cal) as i64 - clock_ns() as i64).abs();
        if err > max_error {
            max_error = err;
        }
    }

    let tsc_freq_khz = (tsc_delta as u128 * 1_000_000) / (mono_delta as u128);
    tracing::debug!(freq_khz = tsc_freq_khz as u64, mult, shift, max_err_ns = max_error, "TSC calibrated");

    if max_error > 1000 {
        tracing::warn!(max_err_ns = max_error, "TSC calibration error above 1us, using fallback");
        return TscCal::fallback();
    }

    cal
}

// ============================================================================
// PREFETCH (HOT PATH CACHE HINT)
// ============================================================================

#[inline(always)]
pub unsafe fn prefetch_read_l1(addr: *const u8) {
    #[cfg(target_arch = "x86_64")]
    {
        core::arch::x86_64::_mm_prefetch::<{ core::arch::x86_64::_MM_HINT_T0 }>(addr as *const i8);
    }
    #[cfg(target_arch = "aarch64")]
    {
        core::arch::asm!("prfm pldl1keep, [{addr}]", addr = in(reg) addr, options(nostack, preserves_flags));
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        let _ = addr;
    }
}
