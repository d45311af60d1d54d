//! 实验结果.

use crate::profile::Profile;
use std::io::{self, Write};

/// 将 `profile` 的结果写进 `w` 中.
fn describe_into<W: Write>(name: &str, p: &Profile, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    #[inline]
    fn f64_to_display(f: Option<f64>) -> String {
        match f {
            Some(f) => format!("{f:.3}"),
            None => "/".to_string(),
        }
    }

    writeln!(w, "Profile `{name}`:")?;
    writeln!(w, "{S4}Cases: {}", p.get_cases())?;
    writeln!(w, "{S4}Analyzed nodules: {}", p.get_nodules())?;
    writeln!(w, "{S4}Failed nodules: {}", p.get_failed())?;
    writeln!(w, "{S4}Mask voxels in total: {}", p.get_voxels())?;
    writeln!(w, "{S4}Segmentation time: {} us", p.get_segment_time_us())?;
    writeln!(w, "{S4}Extraction time: {} us", p.get_extract_time_us())?;
    writeln!(
        w,
        "{S4}Average extraction time: {} us per nodule",
        f64_to_display(p.get_avg_extract_time_us())
    )?;
    writeln!(
        w,
        "{S4}Average extraction time: {} us per 1k voxels",
        f64_to_display(p.get_us_per_kilo_voxel())
    )?;
    writeln!(w, "{S4}Total machine time: {} us", p.get_real_time_us())?;
    let t = p.get_most_time_consuming().map(|d| d.as_micros() as f64);
    write!(w, "{S4}Most time-consuming extraction costs {} us", f64_to_display(t))?;
    Ok(())
}

/// 消融实验最终结果.
pub struct AblationResult {
    data: Vec<(String, Profile)>,
}

impl AblationResult {
    pub fn from_iter<I: IntoIterator<Item = (String, Profile)>>(it: I) -> Self {
        Self {
            data: it.into_iter().collect(),
        }
    }

    /// 输出运行结果.
    pub fn analyze(&self) {
        let mut buf = Vec::with_capacity(512 * (self.data.len() + 1));
        self.describe_all(&mut buf).expect("Writing into memory buffer");
        print!("{}", String::from_utf8_lossy(&buf));
    }

    fn describe_all<W: Write>(&self, w: &mut W) -> io::Result<()> {
        utils::sep_to(&mut *w)?;
        for (key, profile) in self.data.iter() {
            describe_into(key, profile, w)?;
            writeln!(w)?;
            utils::sep_to(&mut *w)?;
        }
        Ok(())
    }
}
