use crate::AssistantStore;
use crate::ControllerPhase;
use crate::SessionLifecycle;
use crate::UiAction;

const SIDE_PANEL_WIDTH: f32 = 420.0;

pub fn phase_label(phase: ControllerPhase) -> &'static str {
    match phase {
        ControllerPhase::Idle => "idle",
        ControllerPhase::AwaitingSuggestion => "thinking",
        ControllerPhase::SuggestionReady => "suggestion ready",
        ControllerPhase::Executing => "executing",
    }
}

/// Window layout: transcript on the left, suggestion controls on the right
/// and a status bar along the bottom. Holds only the goal being typed;
/// everything else lives in [`AssistantStore`].
#[derive(Debug, Default)]
pub struct AssistantEguiView {
    goal_input: String,
}

impl AssistantEguiView {
    pub fn goal_input(&self) -> &str {
        &self.goal_input
    }

    pub fn render(&mut self, ctx: &egui::Context, store: &mut AssistantStore) -> Vec<UiAction> {
        apply_theme(ctx);
        let mut actions = Vec::new();

        egui::TopBottomPanel::bottom("autoterm_status_bar")
            .exact_height(24.0)
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.label(
                        egui::RichText::new(phase_label(store.phase()))
                            .monospace()
                            .small()
                            .color(color_accent()),
                    );
                    ui.separator();
                    ui.label(
                        egui::RichText::new(format!("{} pending", store.pending_suggestions()))
                            .monospace()
                            .small()
                            .color(color_fg()),
                    );
                    ui.separator();
                    ui.label(
                        egui::RichText::new(last_exit_label(store))
                            .monospace()
                            .small()
                            .color(color_comment()),
                    );
                });
            });

        egui::SidePanel::right("autoterm_assistant_panel")
            .resizable(true)
            .default_width(SIDE_PANEL_WIDTH)
            .show(ctx, |ui| {
                ui.add_space(6.0);
                ui.label(egui::RichText::new("AI Suggested Steps:").strong());
                let mut steps = store.suggestion_text();
                ui.add(
                    egui::TextEdit::multiline(&mut steps)
                        .font(egui::TextStyle::Monospace)
                        .desired_rows(10)
                        .desired_width(f32::INFINITY),
                );

                ui.add_space(8.0);
                ui.label(egui::RichText::new("AI Suggested Command:").strong());
                ui.add(
                    egui::TextEdit::singleline(store.command_field_mut())
                        .font(egui::TextStyle::Monospace)
                        .desired_width(f32::INFINITY),
                );

                ui.horizontal(|ui| {
                    if ui.button("Execute").clicked() {
                        actions.push(UiAction::Execute);
                    }
                    if ui.button("Resuggest").clicked() {
                        actions.push(UiAction::Resuggest);
                    }
                    if ui.button("Cancel").clicked() {
                        actions.push(UiAction::Cancel);
                    }
                });

                ui.add_space(12.0);
                ui.separator();
                ui.label(egui::RichText::new("Enter your goal:").strong());
                let response = ui.add(
                    egui::TextEdit::singleline(&mut self.goal_input)
                        .hint_text("e.g. list the largest files here")
                        .desired_width(f32::INFINITY),
                );
                let submitted =
                    response.lost_focus() && ui.input(|input| input.key_pressed(egui::Key::Enter));
                if ui.button("Start").clicked() || submitted {
                    actions.push(UiAction::Start(self.goal_input.clone()));
                }
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::Frame::new()
                .fill(color_terminal_bg())
                .inner_margin(egui::Margin::same(8))
                .show(ui, |ui| {
                    egui::ScrollArea::vertical()
                        .auto_shrink([false, false])
                        .stick_to_bottom(true)
                        .show(ui, |ui| {
                            ui.label(
                                egui::RichText::new(store.output_text())
                                    .monospace()
                                    .color(color_fg()),
                            );
                        });
                });
        });

        actions
    }
}

fn last_exit_label(store: &AssistantStore) -> String {
    match store.last_finished_session().map(|record| record.lifecycle) {
        Some(SessionLifecycle::Finished {
            exit_code: Some(code),
            ..
        }) => format!("last exit: {code}"),
        Some(SessionLifecycle::Finished {
            exit_code: None,
            ..
        }) => String::from("last exit: killed"),
        _ => String::from("last exit: -"),
    }
}

fn apply_theme(ctx: &egui::Context) {
    let mut visuals = egui::Visuals::dark();
    visuals.panel_fill = color_panel_bg();
    visuals.extreme_bg_color = color_terminal_bg();
    visuals.selection.bg_fill = color_accent().gamma_multiply(0.5);
    ctx.set_visuals(visuals);
}

fn color_terminal_bg() -> egui::Color32 {
    egui::Color32::from_rgb(13, 17, 23)
}

fn color_panel_bg() -> egui::Color32 {
    egui::Color32::from_rgb(21, 27, 35)
}

fn color_fg() -> egui::Color32 {
    egui::Color32::from_rgb(230, 237, 243)
}

fn color_comment() -> egui::Color32 {
    egui::Color32::from_rgb(118, 131, 149)
}

fn color_accent() -> egui::Color32 {
    egui::Color32::from_rgb(63, 185, 80)
}
