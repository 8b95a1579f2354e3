// src/types.rs
use ndarray::Array2;

// 采集线程发给处理线程的快照 (拷贝，不共享)
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub samples: Array2<f64>, // channels x window
    pub timestamp_ms: f64,
}

impl Snapshot {
    pub fn num_channels(&self) -> usize {
        self.samples.nrows()
    }
}

// 触发电平变化时发给执行器的命令
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerCommand {
    Rising,
    Falling,
}

impl TriggerCommand {
    pub fn for_level(level: bool) -> Self {
        if level {
            TriggerCommand::Rising
        } else {
            TriggerCommand::Falling
        }
    }
}

// 给可视化层的一帧 (x 轴秒, 包络, 阈值线)
#[derive(Clone, Debug, PartialEq)]
pub struct TraceFrame {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub threshold: Vec<f64>,
    pub trigger: bool,
    pub timestamp_ms: f64,
}
