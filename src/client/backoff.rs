use std::time::Duration;

use rand::Rng;

/// Политика задержек между попытками переподключения.
///
/// Задержка попытки `n` (с единицы): `initial * multiplier^(n-1)`, но не
/// больше `max`. Джиттер уменьшает задержку на случайную долю до `jitter`,
/// поэтому итоговое значение лежит в `[base * (1 - jitter), base]`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Доля случайного разброса, 0.0..=1.0
    pub jitter: f64,
    /// `None` — переподключаться бесконечно
    pub max_attempts: Option<u32>,
}

impl BackoffPolicy {
    /// Постоянная задержка без джиттера.
    pub fn fixed(
        delay: Duration,
        max_attempts: Option<u32>,
    ) -> Self {
        Self {
            initial: delay,
            max: delay,
            multiplier: 1.0,
            jitter: 0.0,
            max_attempts,
        }
    }

    /// Политика без фоновых переподключений.
    pub fn disabled() -> Self {
        Self {
            max_attempts: Some(0),
            ..Self::default()
        }
    }

    /// Задержка попытки без джиттера.
    pub fn base_delay(
        &self,
        attempt: u32,
    ) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exp);
        let millis = self.initial.as_millis() as f64 * factor;
        let capped = millis.min(self.max.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Задержка попытки с джиттером из потока `thread_rng`.
    pub fn delay(
        &self,
        attempt: u32,
    ) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    pub fn delay_with<R: Rng + ?Sized>(
        &self,
        attempt: u32,
        rng: &mut R,
    ) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return base;
        }
        let cut: f64 = rng.gen_range(0.0..=jitter);
        base.mul_f64(1.0 - cut)
    }

    /// Попытка с этим номером уже за пределами лимита.
    pub fn exhausted(
        &self,
        attempt: u32,
    ) -> bool {
        self.max_attempts.is_some_and(|max| attempt > max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: Some(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    /// Тест проверяет экспоненциальный рост и потолок.
    #[test]
    fn test_base_delay_grows_and_caps() {
        let policy = BackoffPolicy {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(1000),
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts: None,
        };
        let delays: Vec<u64> = (1..=6)
            .map(|n| policy.base_delay(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
        assert_eq!(policy.delay(3), Duration::from_millis(400));
    }

    /// Тест проверяет лимит попыток.
    #[test]
    fn test_exhausted() {
        let policy = BackoffPolicy::fixed(Duration::from_millis(10), Some(3));
        assert!(!policy.exhausted(3));
        assert!(policy.exhausted(4));
        assert!(BackoffPolicy::disabled().exhausted(1));
        assert!(!BackoffPolicy::fixed(Duration::ZERO, None).exhausted(u32::MAX));
    }

    proptest! {
        /// Базовые задержки не убывают и не превышают потолок.
        #[test]
        fn prop_base_delay_monotonic(
            initial in 1u64..1_000,
            max in 1_000u64..60_000,
            multiplier in 1.0f64..4.0,
            attempt in 1u32..64,
        ) {
            let policy = BackoffPolicy {
                initial: Duration::from_millis(initial),
                max: Duration::from_millis(max),
                multiplier,
                jitter: 0.0,
                max_attempts: None,
            };
            let cur = policy.base_delay(attempt);
            let next = policy.base_delay(attempt + 1);
            prop_assert!(cur <= next);
            prop_assert!(next <= Duration::from_millis(max));
        }

        /// Джиттер держит задержку в границах `[base * (1 - jitter), base]`.
        #[test]
        fn prop_jitter_within_bounds(
            jitter in 0.0f64..=1.0,
            attempt in 1u32..20,
            seed in any::<u64>(),
        ) {
            let policy = BackoffPolicy {
                jitter,
                max_attempts: None,
                ..BackoffPolicy::default()
            };
            let mut rng = StdRng::seed_from_u64(seed);
            let base = policy.base_delay(attempt);
            let d = policy.delay_with(attempt, &mut rng);
            prop_assert!(d <= base + Duration::from_micros(1));
            prop_assert!(d >= base.mul_f64(1.0 - jitter).saturating_sub(Duration::from_millis(1)));
        }
    }
}
