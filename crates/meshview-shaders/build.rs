//! Build script to compile the GLSL mesh shaders to SPIR-V.
//!
//! The output directory is exported as `MESHVIEW_COMPILED_SHADER_DIR` for the
//! library to pick up.

fn main() {
    // Rerun if shaders change
    println!("cargo:rerun-if-changed=shaders/");

    compile::run();
}

mod compile {
    use shaderc::{Compiler, ShaderKind};
    use std::env;
    use std::fs;
    use std::path::Path;

    pub fn run() {
        let out_dir = env::var("OUT_DIR").unwrap();
        let shader_dir = Path::new("shaders");

        let compiler = Compiler::new().expect("Failed to create shader compiler");

        compile_shader(
            &compiler,
            shader_dir.join("mesh.vert"),
            Path::new(&out_dir).join("vertex.spv"),
            ShaderKind::Vertex,
        );
        compile_shader(
            &compiler,
            shader_dir.join("mesh.frag"),
            Path::new(&out_dir).join("fragment.spv"),
            ShaderKind::Fragment,
        );

        println!("cargo:rustc-env=MESHVIEW_COMPILED_SHADER_DIR={out_dir}");
    }

    fn compile_shader(
        compiler: &Compiler,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        kind: ShaderKind,
    ) {
        let input_path = input.as_ref();
        let output_path = output.as_ref();

        let source = fs::read_to_string(input_path)
            .unwrap_or_else(|e| panic!("Failed to read shader {:?}: {}", input_path, e));

        let file_name = input_path.file_name().unwrap().to_str().unwrap();

        let mut options = shaderc::CompileOptions::new().expect("Failed to create compile options");
        options.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_0 as u32,
        );
        options.set_optimization_level(shaderc::OptimizationLevel::Performance);

        let result = compiler
            .compile_into_spirv(&source, kind, file_name, "main", Some(&options))
            .unwrap_or_else(|e| panic!("Failed to compile shader {:?}: {}", input_path, e));

        if result.get_num_warnings() > 0 {
            println!(
                "cargo:warning=Shader warnings in {:?}: {}",
                input_path,
                result.get_warning_messages()
            );
        }

        fs::write(
            output_path,
            bytemuck::cast_slice::<u32, u8>(result.as_binary()),
        )
        .unwrap_or_else(|e| panic!("Failed to write shader {:?}: {}", output_path, e));
    }
}
