/// Settings of minibatch stochastic-gradient training
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub learning_rate: f32,
    pub batch_size: usize,
    pub num_epochs: usize,
    pub num_pretrain_epochs: usize,
    /// evaluate every `eval_interval` epochs; 0 = only at epoch 0
    pub eval_interval: usize,
    pub anneal_lr: bool,
    pub min_learning_rate: f32,
    pub device: candle_core::Device,
    pub verbose: bool,
    pub show_progress: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.002,
            batch_size: 100,
            num_epochs: 50,
            num_pretrain_epochs: 0,
            eval_interval: 10,
            anneal_lr: false,
            min_learning_rate: 0.0002,
            device: candle_core::Device::Cpu,
            verbose: false,
            show_progress: true,
        }
    }
}

impl TrainConfig {
    /// Step-decayed learning rate when `anneal_lr` is on:
    /// `max(lr0 * 0.9^(epoch / 10), min_learning_rate)`
    pub fn learning_rate_at(&self, epoch: usize) -> f64 {
        let lr0 = self.learning_rate as f64;
        if !self.anneal_lr {
            return lr0;
        }
        let decayed = lr0 * 0.9_f64.powi((epoch / 10) as i32);
        decayed.max(self.min_learning_rate as f64)
    }

    /// Whether `epoch` is an evaluation point
    pub fn is_eval_epoch(&self, epoch: usize) -> bool {
        epoch == 0 || (self.eval_interval > 0 && epoch % self.eval_interval == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn annealing_schedule() {
        let config = TrainConfig {
            learning_rate: 0.002,
            anneal_lr: true,
            ..Default::default()
        };
        assert_abs_diff_eq!(config.learning_rate_at(0), 0.002, epsilon = 1e-9);
        assert_abs_diff_eq!(config.learning_rate_at(9), 0.002, epsilon = 1e-9);
        assert_abs_diff_eq!(config.learning_rate_at(10), 0.0018, epsilon = 1e-9);
        assert_abs_diff_eq!(config.learning_rate_at(1000), 0.0002, epsilon = 1e-9);
    }

    #[test]
    fn constant_without_annealing() {
        let config = TrainConfig::default();
        assert_abs_diff_eq!(config.learning_rate_at(500), 0.002, epsilon = 1e-9);
    }

    #[test]
    fn evaluation_points() {
        let config = TrainConfig {
            eval_interval: 5,
            ..Default::default()
        };
        assert!(config.is_eval_epoch(0));
        assert!(!config.is_eval_epoch(3));
        assert!(config.is_eval_epoch(10));

        let never = TrainConfig {
            eval_interval: 0,
            ..Default::default()
        };
        assert!(never.is_eval_epoch(0));
        assert!(!never.is_eval_epoch(10));
    }
}
