use crate::prelude::*;

/* Round-trip estimation, RFC 6298 (clock granularity G taken as 0)

FIRST SAMPLE R
SRTT = R
RTTVAR = R/2
RTO = SRTT + K * RTTVAR

EVERY LATER SAMPLE R'
RTTVAR = (1 - BETA) * RTTVAR + BETA * |SRTT - R'|
SRTT = (1 - ALPHA) * SRTT + ALPHA * R'
RTO = SRTT + K * RTTVAR

ALPHA = 1/8, BETA = 1/4, K = 4

Only the estimate is kept. No retransmission timer is armed from it.
*/
pub const INITIAL_RTO: Duration = Duration::from_secs(1);
const MIN_RTO: Duration = Duration::from_millis(10);
const MAX_RTO: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RttEstimator {
    rto: Duration,
    srtt: Option<Duration>,
    rttvar: Duration,
    // (sequence number that acknowledges the timed segment, when it was sent)
    pending: Option<(u32, Instant)>,
}

impl Default for RttEstimator {
    fn default() -> Self {
        RttEstimator::new()
    }
}

impl RttEstimator {
    pub fn new() -> RttEstimator {
        RttEstimator {
            rto: INITIAL_RTO,
            srtt: None,
            rttvar: Duration::ZERO,
            pending: None,
        }
    }
    /// Starts timing a segment whose acknowledgment will carry `ack_for`, unless one is already timed
    pub fn start_sample(&mut self, ack_for: u32) {
        if self.pending.is_none() {
            self.pending = Some((ack_for, Instant::now()));
        }
    }
    /// Closes the running sample when `ack` covers the timed segment
    pub fn on_ack(&mut self, ack: u32) {
        if let Some((ack_for, sent)) = self.pending {
            if ack.wrapping_sub(ack_for) as i32 >= 0 {
                self.pending = None;
                self.update_rto(sent.elapsed());
            }
        }
    }
    pub fn update_rto(&mut self, measured_rtt: Duration) {
        match self.srtt {
            Some(srtt) => {
                // Duration has no abs
                let delta = if measured_rtt > srtt { measured_rtt - srtt } else { srtt - measured_rtt };
                self.rttvar = self.rttvar * 3 / 4 + delta / 4;
                self.srtt = Some(srtt * 7 / 8 + measured_rtt / 8);
            }
            None => {
                self.srtt = Some(measured_rtt);
                self.rttvar = measured_rtt / 2;
            }
        }
        let srtt = self.srtt.unwrap_or(measured_rtt);
        self.rto = (srtt + self.rttvar * 4).clamp(MIN_RTO, MAX_RTO);
    }
    pub fn rto(&self) -> Duration {
        self.rto
    }
    /// Smoothed round-trip time, zero before the first sample
    pub fn srtt(&self) -> Duration {
        self.srtt.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_sets_srtt_and_half_variance() {
        let mut est = RttEstimator::new();
        assert_eq!(est.rto(), INITIAL_RTO);
        est.update_rto(Duration::from_millis(100));
        assert_eq!(est.srtt(), Duration::from_millis(100));
        assert_eq!(est.rto(), Duration::from_millis(300));
    }

    #[test]
    fn later_samples_smooth() {
        let mut est = RttEstimator::new();
        est.update_rto(Duration::from_millis(100));
        est.update_rto(Duration::from_millis(200));
        // rttvar = 50*3/4 + 100/4 = 62.5, srtt = 87.5 + 25 = 112.5
        assert_eq!(est.srtt(), Duration::from_micros(112_500));
        assert_eq!(est.rto(), Duration::from_micros(112_500 + 250_000));
    }

    #[test]
    fn rto_is_clamped() {
        let mut est = RttEstimator::new();
        est.update_rto(Duration::from_micros(1));
        assert_eq!(est.rto(), MIN_RTO);
        est.update_rto(Duration::from_secs(600));
        assert_eq!(est.rto(), MAX_RTO);
    }

    #[test]
    fn samples_close_on_covering_ack() {
        let mut est = RttEstimator::new();
        est.start_sample(500);
        est.on_ack(400);
        assert_eq!(est.srtt(), Duration::ZERO);
        est.on_ack(500);
        assert_ne!(est.rto(), INITIAL_RTO);
    }
}
