use serde::Serialize;

use crate::model::{SectionKey, Task};
use crate::view::QueryView;

#[derive(Serialize)]
pub struct SectionDetail<'a> {
    pub key: SectionKey,
    pub title: &'static str,
    pub collapsed: bool,
    pub tasks: &'a [Task],
}

pub fn section_details(view: &QueryView) -> Vec<SectionDetail<'_>> {
    view.sections()
        .iter()
        .map(|s| SectionDetail {
            key: s.key,
            title: s.title(),
            collapsed: view.is_collapsed(s.key),
            tasks: &s.tasks,
        })
        .collect()
}

fn format_date(task: &Task) -> String {
    task.created_at.format("%Y-%m-%d %H:%M").to_string()
}

pub fn format_task_detail(task: &Task) -> String {
    let mut out = String::new();
    out.push_str(&format!("Id:          {}\n", task.id));
    out.push_str(&format!("Title:       {}\n", task.title));
    out.push_str(&format!("Section:     {}\n", task.section_key().label()));
    if !task.description.is_empty() {
        out.push_str(&format!("Description: {}\n", task.description));
    }
    out.push_str(&format!("Created:     {}\n", format_date(task)));
    out
}

pub fn format_task_line(task: &Task) -> String {
    format!(
        "{} {:>5}  {}  ({})\n",
        task.section_key().icon(),
        task.id,
        task.title,
        format_date(task)
    )
}

pub fn format_sections(view: &QueryView) -> String {
    let mut out = String::new();
    for (i, section) in view.sections().iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if view.is_collapsed(section.key) {
            out.push_str(&format!(
                "{} ({} hidden)\n",
                section.title(),
                section.tasks.len()
            ));
            continue;
        }
        out.push_str(&format!("{} ({})\n", section.title(), section.tasks.len()));
        for task in &section.tasks {
            out.push_str(&format_task_line(task));
        }
    }
    out
}
