//! 病灶与不同半径球壳上的特征提取耗时对比.
//!
//! 数据集目录由 `$CHEST_CASE_DIR` 指定 (默认为 `$HOME/dataset/chest`);
//! 目录不存在时使用合成的球形病灶体模.

mod profile;
mod result;
mod runner;

fn main() {
    simple_logger::init_with_level(log::Level::Info).expect("Logger initialization error");
    runner::run().analyze();
}
